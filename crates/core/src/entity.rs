//! Content records that carry their own identifier.

use core::fmt::Debug;
use core::hash::Hash;

/// A stored record addressed by a typed id.
///
/// Stores key their tables on `Id`, so it has to be usable as a map key.
pub trait Entity {
    type Id: Copy + Eq + Hash + Debug;

    fn id(&self) -> &Self::Id;
}
