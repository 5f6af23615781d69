//! Error taxonomy and the process-wide default-locale setting for the
//! handful of user-visible messages this crate produces.

use std::sync::atomic::{AtomicU8, Ordering};

/// A locale for [`MuxError`]'s `Display` output.
///
/// Two locales are provided. The default is process-wide and can be
/// changed once at startup via [`set_default_locale`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locale {
    /// English (default).
    En,
    /// French.
    Fr,
}

static DEFAULT_LOCALE: AtomicU8 = AtomicU8::new(0);

impl Locale {
    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Locale::Fr,
            _ => Locale::En,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Locale::En => 0,
            Locale::Fr => 1,
        }
    }
}

/// Sets the process-wide default locale used when formatting [`MuxError`].
///
/// Affects only errors formatted after this call; already-formatted
/// strings are unaffected.
pub fn set_default_locale(locale: Locale) {
    DEFAULT_LOCALE.store(locale.tag(), Ordering::Relaxed);
}

/// Returns the process-wide default locale.
pub fn locale() -> Locale {
    Locale::from_tag(DEFAULT_LOCALE.load(Ordering::Relaxed))
}

/// The crate's error taxonomy.
///
/// `R` is the cancellation reason type threaded through by the caller; see
/// [`crate::cancel::CancelToken`]. It defaults to [`CancelReason`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum MuxError<R: std::fmt::Debug + std::fmt::Display = CancelReason> {
    /// A holder of a shared (reader) lock on this owner/key attempted to
    /// acquire an exclusive (writer) lock before releasing the shared
    /// lock. Never recovered internally; the attempted acquire is simply
    /// rejected.
    #[error("{}", escalation_message(locale()))]
    Escalation,
    /// The decorator/instrumentation layer needed a capability the host
    /// environment does not provide. Reported at decoration time, not at
    /// acquisition time.
    #[error("{}", unsupported_instrumentation_message(locale()))]
    UnsupportedInstrumentation,
    /// The acquire was canceled, carrying the caller-supplied reason
    /// verbatim.
    #[error("{}: {0}", canceled_message(locale()))]
    Canceled(R),
    /// An internal invariant was violated. This indicates a bug in this
    /// crate, not misuse by a caller.
    #[error("{}: {0}", unreachable_invariant_message(locale()))]
    UnreachableInvariant(&'static str),
}

fn escalation_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "cannot acquire exclusive lock while holding a shared lock on the same owner",
        Locale::Fr => "impossible d'acquérir un verrou exclusif en détenant déjà un verrou partagé sur le même propriétaire",
    }
}

fn unsupported_instrumentation_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "this environment does not support per-owner method instrumentation",
        Locale::Fr => "cet environnement ne prend pas en charge l'instrumentation de méthode par propriétaire",
    }
}

fn canceled_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "lock acquisition canceled",
        Locale::Fr => "acquisition du verrou annulée",
    }
}

fn unreachable_invariant_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "internal invariant violated",
        Locale::Fr => "invariant interne violé",
    }
}

/// The default cancellation reason type: a caller-supplied string.
///
/// Using a plain `String` keeps [`crate::cancel::CancelToken`] usable
/// without a generic parameter in the common case, while still letting
/// advanced callers plug in their own reason type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReason(pub String);

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CancelReason {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CancelReason {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_message_changes_with_locale() {
        set_default_locale(Locale::En);
        let en = MuxError::<CancelReason>::Escalation.to_string();
        set_default_locale(Locale::Fr);
        let fr = MuxError::<CancelReason>::Escalation.to_string();
        set_default_locale(Locale::En);

        assert_ne!(en, fr);
    }

    #[test]
    fn canceled_carries_reason_verbatim() {
        let err = MuxError::Canceled(CancelReason::from("shutdown"));
        assert!(err.to_string().contains("shutdown"));
    }
}
