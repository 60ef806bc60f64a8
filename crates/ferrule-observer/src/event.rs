//! Fixed event vocabulary the Observer publishes (`spec.md` §4.J).

/// `index` refers to the `PoolSlot` a Connection Worker occupies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Connected(usize),
    Disconnected(usize, String),
    Reconnecting(usize),
    UrlAssigned(String),
}
