//! Size-based admission control.
//!
//! A target is checked twice: once against whatever size is known before the
//! transfer ([`AdmissionGate::admit`]) and continuously while bytes arrive
//! ([`AdmissionGate::admit_streaming`]). The second check catches servers that
//! omit or understate `Content-Length`.

use std::fmt;

/// Why a target was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// The size known up front exceeds the limit.
    DeclaredOversize {
        /// Announced size in bytes.
        declared: u64,
        /// Configured limit.
        max_size: u64,
    },
    /// The transfer crossed the limit.
    StreamedOversize {
        /// Bytes seen when the limit was crossed.
        bytes_read: u64,
        /// Configured limit.
        max_size: u64,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclaredOversize { declared, max_size } => write!(
                f,
                "declared size {} exceeds limit {}",
                format_mb(*declared),
                format_mb(*max_size)
            ),
            Self::StreamedOversize {
                bytes_read,
                max_size,
            } => write!(
                f,
                "transfer exceeded limit {} after {}",
                format_mb(*max_size),
                format_mb(*bytes_read)
            ),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Keep going. Provisional when no size was known.
    Admit,
    /// Stop and discard.
    Reject(RejectReason),
}

impl Admission {
    /// Returns true for [`Admission::Admit`].
    #[must_use]
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Size limit applied before and during transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionGate {
    max_size: u64,
}

impl AdmissionGate {
    /// Creates a gate that refuses anything larger than `max_size` bytes.
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    /// Returns the configured limit in bytes.
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Pre-transfer check. An unknown size is admitted provisionally.
    #[must_use]
    pub fn admit(&self, declared: Option<u64>) -> Admission {
        match declared {
            Some(declared) if declared > self.max_size => {
                Admission::Reject(RejectReason::DeclaredOversize {
                    declared,
                    max_size: self.max_size,
                })
            }
            _ => Admission::Admit,
        }
    }

    /// In-transfer check against the cumulative byte count.
    #[must_use]
    pub fn admit_streaming(&self, bytes_read: u64) -> Admission {
        if bytes_read > self.max_size {
            Admission::Reject(RejectReason::StreamedOversize {
                bytes_read,
                max_size: self.max_size,
            })
        } else {
            Admission::Admit
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_mb(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_admit_unknown_size_is_provisional_admit() {
        let gate = AdmissionGate::new(50 * MB);
        assert_eq!(gate.admit(None), Admission::Admit);
    }

    #[test]
    fn test_admit_small_declared_size() {
        let gate = AdmissionGate::new(50 * MB);
        assert!(gate.admit(Some(2 * MB)).is_admitted());
    }

    #[test]
    fn test_admit_exactly_at_limit() {
        let gate = AdmissionGate::new(50 * MB);
        assert!(gate.admit(Some(50 * MB)).is_admitted());
        assert!(gate.admit_streaming(50 * MB).is_admitted());
    }

    #[test]
    fn test_admit_rejects_declared_oversize() {
        let gate = AdmissionGate::new(50 * MB);
        assert_eq!(
            gate.admit(Some(2100 * MB)),
            Admission::Reject(RejectReason::DeclaredOversize {
                declared: 2100 * MB,
                max_size: 50 * MB,
            })
        );
    }

    #[test]
    fn test_admit_streaming_rejects_one_byte_over() {
        let gate = AdmissionGate::new(1000);
        assert_eq!(
            gate.admit_streaming(1001),
            Admission::Reject(RejectReason::StreamedOversize {
                bytes_read: 1001,
                max_size: 1000,
            })
        );
    }

    #[test]
    fn test_reject_reason_display_mentions_sizes() {
        let reason = RejectReason::DeclaredOversize {
            declared: 2100 * MB,
            max_size: 50 * MB,
        };
        let text = reason.to_string();
        assert!(text.contains("2100.0 MB"), "{text}");
        assert!(text.contains("50.0 MB"), "{text}");
    }
}
