//! # Cards Module
//!
//! Identity cards, their rotation chains, and the local card cache.
//!
//! ## Invariants
//!
//! - At most one card per identity is current (`is_outdated == false`)
//! - A `previous_card_id` names an older card of the same identity
//! - Chains are acyclic and strictly decreasing in `created_at`
//! - `is_outdated` only ever flips from false to true
//!
//! | Type | Role |
//! |------|------|
//! | [`RawCard`] | Signed form exchanged with the directory |
//! | [`Card`] | Verified card with resolved predecessor chain |
//! | [`CardStorage`] | Cache enforcing the invariants above |
//! | [`CardPersistence`] | Row storage the cache runs on |

mod card;
mod memory;
mod storage;

pub use card::{Card, CardChain, CardContent, RawCard, CARD_VERSION};
pub use memory::MemoryCardPersistence;
pub use storage::{CardPersistence, CardRecord, CardStorage};
