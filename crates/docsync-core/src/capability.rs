//! Typed outcome of constructing an external capability.
//!
//! Converters and embedders can come up in a reduced mode (for example a
//! CUDA device was requested but only the CPU is available). Callers get an
//! [`Acquired`] inside a `Result`: `Ok(Ready)` when everything requested is
//! in effect, `Ok(Degraded)` when the capability works but slower or with
//! fewer features, and `Err` when it is unusable.

/// A capability that was successfully constructed, possibly in a reduced mode.
#[derive(Debug)]
pub enum Acquired<T> {
    Ready(T),
    Degraded { value: T, reason: String },
}

impl<T> Acquired<T> {
    /// Returns the capability regardless of mode.
    pub fn into_inner(self) -> T {
        match self {
            Acquired::Ready(value) | Acquired::Degraded { value, .. } => value,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Acquired::Ready(value) | Acquired::Degraded { value, .. } => value,
        }
    }

    /// The reason for running degraded, if any.
    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Acquired::Ready(_) => None,
            Acquired::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Acquired::Degraded { .. })
    }

    /// Downgrade to degraded with `reason`, appending to any existing reason.
    pub fn degrade(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match self {
            Acquired::Ready(value) => Acquired::Degraded { value, reason },
            Acquired::Degraded {
                value,
                reason: existing,
            } => Acquired::Degraded {
                value,
                reason: format!("{}; {}", existing, reason),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_has_no_reason() {
        let a = Acquired::Ready(5);
        assert!(!a.is_degraded());
        assert_eq!(a.degraded_reason(), None);
        assert_eq!(a.into_inner(), 5);
    }

    #[test]
    fn degrade_accumulates_reasons() {
        let a = Acquired::Ready("conv")
            .degrade("cuda unavailable")
            .degrade("ocr unsupported");
        assert_eq!(a.degraded_reason(), Some("cuda unavailable; ocr unsupported"));
        assert_eq!(*a.get(), "conv");
    }
}
