use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{direction, like_pattern, push_window, PgStore};
use crate::models::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentSort, DoctorBrief,
    NewAppointment, PersonBrief, TreatmentBrief,
};
use crate::store::{AppointmentStore, ListOptions, StoreError, StoreResult};

const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id, patient_id, doctor_id, treatment_id, date, start_time, end_time,
    status, notes, created_at, updated_at
"#;

const SELECT_DETAILS: &str = r#"
    SELECT
      a.appointment_id,
      a.patient_id,
      a.doctor_id,
      a.treatment_id,
      a.date,
      a.start_time,
      a.end_time,
      a.status,
      a.notes,
      a.created_at,
      a.updated_at,

      p.first_name AS p_first,
      p.last_name  AS p_last,

      d.name  AS d_name,
      d.color AS d_color,

      t.name         AS t_name,
      t.duration_min AS t_duration,
      t.price_cents  AS t_price

    FROM appointment a
    LEFT JOIN patient p ON p.patient_id = a.patient_id
    LEFT JOIN doctor d ON d.doctor_id = a.doctor_id
    LEFT JOIN treatment t ON t.treatment_id = a.treatment_id
"#;

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &AppointmentFilter) {
    qb.push(" WHERE TRUE");
    if let Some(id) = f.patient_id {
        qb.push(" AND a.patient_id = ").push_bind(id);
    }
    if let Some(id) = f.doctor_id {
        qb.push(" AND a.doctor_id = ").push_bind(id);
    }
    if let Some(id) = f.treatment_id {
        qb.push(" AND a.treatment_id = ").push_bind(id);
    }
    if !f.statuses.is_empty() {
        let statuses: Vec<i16> = f.statuses.iter().map(|s| *s as i16).collect();
        qb.push(" AND a.status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(status) = f.exclude_status {
        qb.push(" AND a.status <> ").push_bind(status as i16);
    }
    if let Some(id) = f.exclude_id {
        qb.push(" AND a.appointment_id <> ").push_bind(id);
    }
    if let Some(d) = f.date_from {
        qb.push(" AND a.date >= ").push_bind(d);
    }
    if let Some(d) = f.date_to {
        qb.push(" AND a.date <= ").push_bind(d);
    }
    if let Some((date, time)) = f.starting_from {
        qb.push(" AND (a.date > ")
            .push_bind(date)
            .push(" OR (a.date = ")
            .push_bind(date)
            .push(" AND a.start_time >= ")
            .push_bind(time)
            .push("))");
    }
    if let Some(q) = f.search.as_deref() {
        qb.push(" AND a.notes ILIKE ").push_bind(like_pattern(q));
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, opts: &ListOptions<AppointmentSort>) {
    let dir = direction(opts.order);
    let clause = match opts.sort {
        AppointmentSort::Date => format!(" ORDER BY a.date {dir}, a.start_time {dir}"),
        AppointmentSort::StartTime => format!(" ORDER BY a.start_time {dir}"),
        AppointmentSort::Status => format!(" ORDER BY a.status {dir}, a.date {dir}"),
        AppointmentSort::CreatedAt => format!(" ORDER BY a.created_at {dir}"),
    };
    qb.push(clause);
}

fn details_from_row(r: &PgRow) -> Result<AppointmentDetails, sqlx::Error> {
    let appointment = Appointment::from_row(r)?;

    let p_first: Option<String> = r.try_get("p_first")?;
    let p_last: Option<String> = r.try_get("p_last")?;
    let patient = match (p_first, p_last) {
        (Some(first), Some(last)) => Some(PersonBrief {
            id: appointment.patient_id,
            display: format!("{first} {last}"),
        }),
        _ => None,
    };

    let d_name: Option<String> = r.try_get("d_name")?;
    let d_color: Option<String> = r.try_get("d_color")?;
    let doctor = match (d_name, d_color) {
        (Some(name), Some(color)) => Some(DoctorBrief {
            id: appointment.doctor_id,
            name,
            color,
        }),
        _ => None,
    };

    let t_name: Option<String> = r.try_get("t_name")?;
    let t_duration: Option<i32> = r.try_get("t_duration")?;
    let t_price: Option<i64> = r.try_get("t_price")?;
    let treatment = match (t_name, t_duration, t_price) {
        (Some(name), Some(duration_min), Some(price_cents)) => Some(TreatmentBrief {
            id: appointment.treatment_id,
            name,
            duration_min,
            price_cents,
        }),
        _ => None,
    };

    Ok(AppointmentDetails {
        appointment,
        patient,
        doctor,
        treatment,
    })
}

#[async_trait]
impl AppointmentStore for PgStore {
    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        opts: &ListOptions<AppointmentSort>,
    ) -> StoreResult<Vec<AppointmentDetails>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_DETAILS);
        push_filter(&mut qb, filter);
        push_order(&mut qb, opts);
        push_window(&mut qb, opts.limit, opts.offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("failed to load appointments"))?;

        rows.iter()
            .map(details_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::db("failed to decode appointment row"))
    }

    async fn count_appointments(&self, filter: &AppointmentFilter) -> StoreResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM appointment a");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to count appointments"))
    }

    async fn get_appointment(&self, id: Uuid) -> StoreResult<Option<AppointmentDetails>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_DETAILS);
        qb.push(" WHERE a.appointment_id = ").push_bind(id);

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::db("failed to load appointment"))?;

        row.as_ref()
            .map(details_from_row)
            .transpose()
            .map_err(StoreError::db("failed to decode appointment row"))
    }

    async fn insert_appointment(&self, new: &NewAppointment) -> StoreResult<Appointment> {
        let sql = format!(
            r#"
            INSERT INTO appointment (
              patient_id, doctor_id, treatment_id, date, start_time, end_time, status, notes
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Appointment>(&sql)
            .bind(new.patient_id)
            .bind(new.doctor_id)
            .bind(new.treatment_id)
            .bind(new.date)
            .bind(new.start_time)
            .bind(new.end_time)
            .bind(new.status)
            .bind(new.notes.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("failed to create appointment"))
    }

    async fn update_appointment(&self, appt: &Appointment) -> StoreResult<Option<Appointment>> {
        let sql = format!(
            r#"
            UPDATE appointment
            SET patient_id = $2,
                doctor_id = $3,
                treatment_id = $4,
                date = $5,
                start_time = $6,
                end_time = $7,
                status = $8,
                notes = $9,
                updated_at = now()
            WHERE appointment_id = $1
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Appointment>(&sql)
            .bind(appt.appointment_id)
            .bind(appt.patient_id)
            .bind(appt.doctor_id)
            .bind(appt.treatment_id)
            .bind(appt.date)
            .bind(appt.start_time)
            .bind(appt.end_time)
            .bind(appt.status)
            .bind(appt.notes.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::db("failed to update appointment"))
    }

    async fn appointment_counts_by_treatment(&self) -> StoreResult<Vec<(Uuid, i64)>> {
        sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT treatment_id, COUNT(*)
            FROM appointment
            GROUP BY treatment_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::db("failed to count appointments per treatment"))
    }
}
