pub mod address_book;
pub mod client;
pub mod scheduler;

pub use address_book::{AddressBook, AddressBookError, SharedAddressBook};
pub use client::{SendError, SyncClient, SyncTransport, default_address, sync_url};
pub use scheduler::{
    SchedulerEvent, SchedulerHandle, SchedulerOptions, SchedulerSnapshot, smart_delay,
    spawn_scheduler,
};
