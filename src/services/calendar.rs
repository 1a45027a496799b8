//! Month view: a fixed 6x7 grid of days starting on a Sunday.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AppointmentDetails, AppointmentFilter, AppointmentSort, SortOrder};
use crate::store::{ListOptions, Store};

pub const GRID_CELLS: i64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDayCell<T> {
    pub date: NaiveDate,
    pub is_current_month: bool,
    pub appointments: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub cells: Vec<CalendarDayCell<AppointmentDetails>>,
}

/// First and last day of the month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let invalid = || ApiError::validation(format!("invalid month {year}-{month}"));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next_first = NaiveDate::from_ymd_opt(ny, nm, 1).ok_or_else(invalid)?;
    Ok((first, next_first - Duration::days(1)))
}

/// Lays `items` out on the 42 days covering the month. The leading cells come
/// from the previous month so that the first cell is a Sunday; trailing cells
/// spill into the next month. Items dated outside the grid are dropped and the
/// input order is kept within each day.
pub fn build_month_grid<T>(
    year: i32,
    month: u32,
    items: impl IntoIterator<Item = T>,
    date_of: impl Fn(&T) -> NaiveDate,
) -> Result<Vec<CalendarDayCell<T>>, ApiError> {
    let (first, _) = month_bounds(year, month)?;
    let out_of_range = || ApiError::validation(format!("invalid month {year}-{month}"));
    let leading = i64::from(first.weekday().num_days_from_sunday());
    let grid_start = first
        .checked_sub_signed(Duration::days(leading))
        .ok_or_else(out_of_range)?;
    let days = (0..GRID_CELLS)
        .map(|offset| grid_start.checked_add_signed(Duration::days(offset)))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(out_of_range)?;

    let mut by_day: HashMap<NaiveDate, Vec<T>> = HashMap::new();
    for item in items {
        by_day.entry(date_of(&item)).or_default().push(item);
    }

    Ok(days
        .into_iter()
        .map(|date| CalendarDayCell {
            date,
            is_current_month: date.year() == year && date.month() == month,
            appointments: by_day.remove(&date).unwrap_or_default(),
        })
        .collect())
}

/// Loads the month's appointments (cancelled ones included) and builds the grid.
pub async fn month_view(
    store: &dyn Store,
    year: i32,
    month: u32,
    doctor_id: Option<Uuid>,
) -> Result<MonthView, ApiError> {
    let (first, last) = month_bounds(year, month)?;
    let filter = AppointmentFilter {
        doctor_id,
        date_from: Some(first),
        date_to: Some(last),
        ..Default::default()
    };
    let appointments = store
        .list_appointments(&filter, &ListOptions::all(AppointmentSort::Date, SortOrder::Asc))
        .await?;
    tracing::debug!(year, month, count = appointments.len(), "building month view");

    let cells = build_month_grid(year, month, appointments, |a| a.appointment.date)?;
    Ok(MonthView { year, month, cells })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn leading_cells(cells: &[CalendarDayCell<(NaiveDate, &str)>]) -> usize {
        cells.iter().take_while(|c| !c.is_current_month).count()
    }

    #[test]
    fn month_starting_on_sunday_has_no_leading_days() {
        let cells = build_month_grid(2024, 9, Vec::<(NaiveDate, &str)>::new(), |i| i.0).unwrap();
        assert_eq!(cells.len(), 42);
        assert_eq!(cells[0].date, d(2024, 9, 1));
        assert_eq!(leading_cells(&cells), 0);
        assert_eq!(cells.iter().filter(|c| c.is_current_month).count(), 30);
    }

    #[test]
    fn month_starting_on_saturday_has_six_leading_days() {
        let cells = build_month_grid(2024, 6, Vec::<(NaiveDate, &str)>::new(), |i| i.0).unwrap();
        assert_eq!(cells.len(), 42);
        assert_eq!(leading_cells(&cells), 6);
        assert_eq!(cells[0].date, d(2024, 5, 26));
        assert_eq!(cells[6].date, d(2024, 6, 1));
        assert_eq!(cells[41].date, d(2024, 7, 6));
    }

    #[test]
    fn every_grid_starts_on_sunday_and_is_contiguous() {
        for month in 1..=12 {
            let cells = build_month_grid(2025, month, Vec::<(NaiveDate, &str)>::new(), |i| i.0).unwrap();
            assert_eq!(cells[0].date.weekday(), Weekday::Sun);
            for pair in cells.windows(2) {
                assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
            }
        }
    }

    #[test]
    fn items_are_grouped_by_date_in_input_order() {
        let items = vec![
            (d(2024, 6, 10), "late"),
            (d(2024, 6, 3), "a"),
            (d(2024, 6, 10), "later"),
            (d(2024, 5, 31), "spill"),
            (d(2024, 8, 20), "outside"),
        ];
        let cells = build_month_grid(2024, 6, items, |i| i.0).unwrap();

        let day = |date: NaiveDate| cells.iter().find(|c| c.date == date).unwrap();
        let names = |date: NaiveDate| day(date).appointments.iter().map(|i| i.1).collect::<Vec<_>>();

        assert_eq!(names(d(2024, 6, 10)), vec!["late", "later"]);
        assert_eq!(names(d(2024, 6, 3)), vec!["a"]);
        assert_eq!(names(d(2024, 5, 31)), vec!["spill"]);
        assert!(!day(d(2024, 5, 31)).is_current_month);

        let placed: usize = cells.iter().map(|c| c.appointments.len()).sum();
        assert_eq!(placed, 4);
    }

    #[test]
    fn month_bounds_handle_leap_years_and_december() {
        assert_eq!(month_bounds(2024, 2).unwrap(), (d(2024, 2, 1), d(2024, 2, 29)));
        assert_eq!(month_bounds(2023, 2).unwrap().1, d(2023, 2, 28));
        assert_eq!(month_bounds(2024, 12).unwrap().1, d(2024, 12, 31));
    }

    #[test]
    fn invalid_month_is_a_validation_error() {
        let err = build_month_grid(2024, 13, Vec::<(NaiveDate, &str)>::new(), |i| i.0).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(month_bounds(2024, 0).is_err());

        // January of chrono's first year starts mid-week; the leading days do not exist.
        let err = build_month_grid(-262143, 1, Vec::<(NaiveDate, &str)>::new(), |i| i.0).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
