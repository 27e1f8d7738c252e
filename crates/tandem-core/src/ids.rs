use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a string-backed identifier with a readable prefix.
///
/// Generated values are `<prefix>_<uuid v7>` so they sort by creation time;
/// values supplied by callers are kept verbatim via `from_raw`.
macro_rules! prefixed_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_raw(s)
            }
        }
    };
}

prefixed_id!(ThreadId, "thread");
prefixed_id!(SynthesisSessionId, "synth");
prefixed_id!(ToolCallId, "call");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(ThreadId::new().as_str().starts_with("thread_"));
        assert!(SynthesisSessionId::new().as_str().starts_with("synth_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
    }

    #[test]
    fn generated_ids_sort_by_creation() {
        let ids: Vec<ThreadId> = (0..50).map(|_| ThreadId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn caller_supplied_ids_are_kept_verbatim() {
        let id = ThreadId::from_raw("support-ticket-42");
        assert_eq!(id.as_str(), "support-ticket-42");
        let parsed: ThreadId = "support-ticket-42".parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = SynthesisSessionId::from_raw("synth_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""synth_abc""#);
        let back: SynthesisSessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
