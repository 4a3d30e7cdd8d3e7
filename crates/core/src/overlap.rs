use chrono::NaiveDate;

use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::{LeaveRequest, LeaveRequestId, LeaveRequestStatus};

/// Inclusive interval intersection: [a1,a2] meets [b1,b2] iff a1 <= b2 and b1 <= a2.
pub fn ranges_overlap(
    a_from: NaiveDate,
    a_to: NaiveDate,
    b_from: NaiveDate,
    b_to: NaiveDate,
) -> bool {
    a_from <= b_to && b_from <= a_to
}

/// Live requests (Pending or Approved) for the employee that intersect the
/// candidate range, excluding the candidate's own id. Not hard-blocking by
/// itself: callers and the approval workflow decide what to do with hits.
pub fn overlapping_requests<'a>(
    requests: &'a [LeaveRequest],
    employee_id: &EmployeeId,
    from_date: NaiveDate,
    to_date: NaiveDate,
    exclude: Option<&LeaveRequestId>,
) -> Vec<&'a LeaveRequest> {
    requests
        .iter()
        .filter(|request| &request.employee_id == employee_id)
        .filter(|request| {
            matches!(request.status, LeaveRequestStatus::Pending | LeaveRequestStatus::Approved)
        })
        .filter(|request| exclude != Some(&request.id))
        .filter(|request| ranges_overlap(from_date, to_date, request.from_date, request.to_date))
        .collect()
}

pub fn has_overlapping_leave(
    requests: &[LeaveRequest],
    employee_id: &EmployeeId,
    from_date: NaiveDate,
    to_date: NaiveDate,
    exclude: Option<&LeaveRequestId>,
) -> bool {
    !overlapping_requests(requests, employee_id, from_date, to_date, exclude).is_empty()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::domain::employee::EmployeeId;
    use crate::domain::leave_request::{LeaveRequest, LeaveRequestId, LeaveRequestStatus};
    use crate::domain::leave_type::LeaveTypeId;

    use super::{has_overlapping_leave, overlapping_requests, ranges_overlap};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(
        id: &str,
        employee: &str,
        from: NaiveDate,
        to: NaiveDate,
        status: LeaveRequestStatus,
    ) -> LeaveRequest {
        LeaveRequest {
            id: LeaveRequestId(id.to_string()),
            employee_id: EmployeeId(employee.to_string()),
            leave_type_id: LeaveTypeId("lt-annual".to_string()),
            from_date: from,
            to_date: to,
            is_half_day: false,
            half_day_slot: None,
            total_days: Decimal::ONE,
            reason: "time off".to_string(),
            use_comp_off: false,
            comp_off_days_used: Decimal::ZERO,
            comp_off_ids: Vec::new(),
            status,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn intersecting_ranges_overlap() {
        assert!(ranges_overlap(
            date(2025, 3, 10),
            date(2025, 3, 15),
            date(2025, 3, 12),
            date(2025, 3, 20)
        ));
    }

    #[test]
    fn disjoint_ranges_do_not_overlap() {
        assert!(!ranges_overlap(
            date(2025, 3, 1),
            date(2025, 3, 5),
            date(2025, 3, 10),
            date(2025, 3, 15)
        ));
    }

    #[test]
    fn shared_boundary_day_counts_as_overlap() {
        assert!(ranges_overlap(
            date(2025, 3, 1),
            date(2025, 3, 5),
            date(2025, 3, 5),
            date(2025, 3, 8)
        ));
    }

    #[test]
    fn detects_overlap_against_approved_request() {
        let existing = vec![request(
            "req-1",
            "emp-1",
            date(2025, 3, 12),
            date(2025, 3, 20),
            LeaveRequestStatus::Approved,
        )];

        assert!(has_overlapping_leave(
            &existing,
            &EmployeeId("emp-1".to_string()),
            date(2025, 3, 10),
            date(2025, 3, 15),
            None,
        ));
    }

    #[test]
    fn ignores_terminal_requests() {
        let existing = vec![
            request("req-1", "emp-1", date(2025, 3, 12), date(2025, 3, 20), LeaveRequestStatus::Cancelled),
            request("req-2", "emp-1", date(2025, 3, 12), date(2025, 3, 20), LeaveRequestStatus::Rejected),
        ];

        assert!(!has_overlapping_leave(
            &existing,
            &EmployeeId("emp-1".to_string()),
            date(2025, 3, 10),
            date(2025, 3, 15),
            None,
        ));
    }

    #[test]
    fn ignores_other_employees() {
        let existing = vec![request(
            "req-1",
            "emp-2",
            date(2025, 3, 12),
            date(2025, 3, 20),
            LeaveRequestStatus::Approved,
        )];

        assert!(!has_overlapping_leave(
            &existing,
            &EmployeeId("emp-1".to_string()),
            date(2025, 3, 10),
            date(2025, 3, 15),
            None,
        ));
    }

    #[test]
    fn excludes_the_candidate_itself_on_edit() {
        let existing = vec![request(
            "req-1",
            "emp-1",
            date(2025, 3, 10),
            date(2025, 3, 15),
            LeaveRequestStatus::Pending,
        )];

        let exclude = LeaveRequestId("req-1".to_string());
        assert!(!has_overlapping_leave(
            &existing,
            &EmployeeId("emp-1".to_string()),
            date(2025, 3, 10),
            date(2025, 3, 15),
            Some(&exclude),
        ));
    }

    #[test]
    fn returns_every_intersecting_request() {
        let existing = vec![
            request("req-1", "emp-1", date(2025, 3, 8), date(2025, 3, 11), LeaveRequestStatus::Pending),
            request("req-2", "emp-1", date(2025, 3, 14), date(2025, 3, 18), LeaveRequestStatus::Approved),
            request("req-3", "emp-1", date(2025, 4, 1), date(2025, 4, 3), LeaveRequestStatus::Approved),
        ];

        let hits = overlapping_requests(
            &existing,
            &EmployeeId("emp-1".to_string()),
            date(2025, 3, 10),
            date(2025, 3, 15),
            None,
        );
        let ids: Vec<&str> = hits.iter().map(|request| request.id.0.as_str()).collect();
        assert_eq!(ids, vec!["req-1", "req-2"]);
    }
}
