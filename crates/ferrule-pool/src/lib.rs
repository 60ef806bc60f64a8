//! Edge Address Book and Protocol Selector (`spec.md` §4.A, §4.B): the two
//! pieces of state a Connection Worker consults before every dial attempt.

pub mod address_book;
pub mod protocol_selector;

pub use address_book::AddressBook;
pub use protocol_selector::ProtocolSelector;
