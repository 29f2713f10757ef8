//! Certificate validity windows
//!
//! Windows are computed in calendar months from a start instant truncated to whole
//! seconds, so the `expires_at` reported to callers matches the encoded `notAfter`.

use crate::error::{CaError, CaResult};
use chrono::{DateTime, Months, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};

/// CA certificates are valid for ten years
pub const CA_VALIDITY_MONTHS: u32 = 120;
/// Leaf certificates are valid for one year
pub const LEAF_VALIDITY_MONTHS: u32 = 12;

/// `[not_before, not_after]` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityWindow {
    /// Window starting now and lasting `months` calendar months
    pub fn months_from_now(months: u32) -> CaResult<Self> {
        Self::months_from(Utc::now(), months)
    }

    /// Window starting at `start` and lasting `months` calendar months
    pub fn months_from(start: DateTime<Utc>, months: u32) -> CaResult<Self> {
        let not_before = DateTime::from_timestamp(start.timestamp(), 0)
            .ok_or_else(|| CaError::Signing("validity start out of range".to_string()))?;
        let not_after = not_before
            .checked_add_months(Months::new(months))
            .ok_or_else(|| CaError::Signing("validity end out of range".to_string()))?;
        Ok(Self {
            not_before,
            not_after,
        })
    }

    pub(crate) fn not_before_asn1(&self) -> CaResult<Asn1Time> {
        to_asn1(self.not_before)
    }

    pub(crate) fn not_after_asn1(&self) -> CaResult<Asn1Time> {
        to_asn1(self.not_after)
    }
}

fn to_asn1(instant: DateTime<Utc>) -> CaResult<Asn1Time> {
    Asn1Time::from_unix(instant.timestamp() as _)
        .map_err(|e| CaError::Signing(format!("Failed to encode validity time: {}", e)))
}

/// Convert an ASN.1 certificate time into a UTC instant
pub fn asn1_to_datetime(time: &Asn1TimeRef) -> CaResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).map_err(|e| CaError::Parse(e.to_string()))?;
    let diff = epoch
        .diff(time)
        .map_err(|e| CaError::Parse(format!("Failed to read certificate time: {}", e)))?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CaError::Parse("certificate time out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_calendar_year_window() {
        let start = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 15).unwrap();
        let window = ValidityWindow::months_from(start, LEAF_VALIDITY_MONTHS).unwrap();
        assert_eq!(window.not_before, start);
        assert_eq!(
            window.not_after,
            Utc.with_ymd_and_hms(2025, 2, 28, 12, 30, 15).unwrap()
        );
    }

    #[test]
    fn test_asn1_conversion_preserves_seconds() {
        let start = Utc.with_ymd_and_hms(2031, 7, 4, 8, 0, 1).unwrap();
        let window = ValidityWindow::months_from(start, CA_VALIDITY_MONTHS).unwrap();
        let asn1 = window.not_after_asn1().unwrap();
        assert_eq!(asn1_to_datetime(&asn1).unwrap(), window.not_after);
    }
}
