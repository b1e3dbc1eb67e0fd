//! Attendance address persistence

use async_trait::async_trait;
use sqlx::SqlitePool;

use hris_common::{Error, Result};

/// Which address column of an attendance row a job fills in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressColumn {
    CheckIn,
    CheckOut,
}

impl AddressColumn {
    pub fn for_job(is_checkout: bool) -> Self {
        if is_checkout {
            Self::CheckOut
        } else {
            Self::CheckIn
        }
    }

    fn update_sql(self) -> &'static str {
        match self {
            Self::CheckIn => "UPDATE attendances SET check_in_address = ? WHERE id = ?",
            Self::CheckOut => "UPDATE attendances SET check_out_address = ? WHERE id = ?",
        }
    }
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn update_address(
        &self,
        attendance_id: i64,
        column: AddressColumn,
        address: &str,
    ) -> Result<()>;
}

pub struct SqliteAttendanceStore {
    pool: SqlitePool,
}

impl SqliteAttendanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceStore for SqliteAttendanceStore {
    async fn update_address(
        &self,
        attendance_id: i64,
        column: AddressColumn,
        address: &str,
    ) -> Result<()> {
        let result = sqlx::query(column.update_sql())
            .bind(address)
            .bind(attendance_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("attendance {}", attendance_id)));
        }

        Ok(())
    }
}
