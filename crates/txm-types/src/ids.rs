use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity a transaction is submitted under. Nonces are scoped per
/// signer; the core never interprets the contents of this string.
pub type Signer = String;

/// Globally unique transaction id, assigned by the caller at submission time.
pub type TxId = String;

/// Arbitrary-precision non-negative nonce. `alloy_primitives::U256` is used
/// rather than a hand-rolled bignum: it is already the idiomatic "big unsigned
/// integer that never needs to go negative" type for ledger nonces.
pub type Nonce = alloy_primitives::U256;

/// Opaque, ledger-specific transaction hash. May change across resubmissions
/// of the same [`TxId`].
pub type TxHash = String;

/// Time-ordered identifier used for stable pagination of the pending list.
/// Backed by a UUIDv7 (time-ordered, per RFC 9562) so that ordering by id is
/// equivalent to ordering by creation time without a separate sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceId(pub Uuid);

impl SequenceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(StreamId, "Time-ordered id of an event stream.");
uuid_id!(ListenerId, "Globally unique id of a listener.");
