use std::io::Write;

use voicesync_core::MAX_ADDRESS_HISTORY;
use voicesync_sender::{AddressBook, SharedAddressBook, address_book::MAX_ADDRESS_BOOK_BYTES};

#[test]
fn load_address_book_rejects_oversized_file() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("prefs.json");

    let mut file = std::fs::File::create(&path).expect("create prefs.json");
    file.write_all(&vec![b'a'; (MAX_ADDRESS_BOOK_BYTES as usize) + 1024])
        .expect("write oversized prefs.json");
    drop(file);

    let err = AddressBook::load_from_path(&path).expect_err("oversized file should error");
    let msg = err.to_string();
    assert!(msg.contains("too large"), "unexpected error: {msg}");

    // open() falls back to an empty book instead.
    assert!(AddressBook::open(&path).is_empty());
}

#[test]
fn missing_or_corrupt_file_opens_empty() {
    let dir = tempfile::tempdir().expect("create tempdir");
    assert!(AddressBook::open(dir.path().join("absent.json")).is_empty());

    let path = dir.path().join("prefs.json");
    std::fs::write(&path, "{ not json").expect("write corrupt prefs.json");
    assert!(AddressBook::open(&path).is_empty());
}

#[test]
fn touch_moves_address_to_front_and_persists() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("prefs.json");

    let mut book = AddressBook::open(&path);
    book.touch("192.168.1.10:4500").unwrap();
    book.touch("192.168.1.20:4500").unwrap();
    book.touch("192.168.1.10:4500").unwrap();

    let addresses: Vec<&str> = book.entries().map(|entry| entry.address.as_str()).collect();
    assert_eq!(addresses, vec!["192.168.1.10:4500", "192.168.1.20:4500"]);

    let raw = std::fs::read_to_string(&path).expect("read prefs.json");
    assert!(raw.contains("ip_history_list"), "unexpected document: {raw}");

    let reloaded = AddressBook::load_from_path(&path).expect("reload prefs.json");
    assert_eq!(reloaded.latest(), Some("192.168.1.10:4500"));
    assert_eq!(reloaded.len(), 2);
}

#[test]
fn history_keeps_only_the_ten_most_recent() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("prefs.json");

    let mut book = AddressBook::open(&path);
    for host in 0..12 {
        book.touch(&format!("10.0.0.{host}:4500")).unwrap();
    }

    assert_eq!(book.len(), MAX_ADDRESS_HISTORY);
    assert_eq!(book.latest(), Some("10.0.0.11:4500"));
    assert!(book.entries().all(|entry| entry.address != "10.0.0.0:4500"));
    assert!(book.entries().all(|entry| entry.address != "10.0.0.1:4500"));

    let reloaded = AddressBook::load_from_path(&path).unwrap();
    assert_eq!(reloaded.len(), MAX_ADDRESS_HISTORY);
}

#[test]
fn oversized_list_on_disk_is_deduplicated_and_truncated() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("prefs.json");

    let mut entries: Vec<String> = (0..15)
        .map(|host| format!(r#"{{"address":"10.0.0.{host}:4500","lastUsedAtMillis":{host}}}"#))
        .collect();
    entries.insert(1, r#"{"address":"10.0.0.0:4500","lastUsedAtMillis":99}"#.to_owned());
    std::fs::write(&path, format!(r#"{{"ip_history_list":[{}]}}"#, entries.join(","))).unwrap();

    let book = AddressBook::load_from_path(&path).unwrap();
    assert_eq!(book.len(), MAX_ADDRESS_HISTORY);
    let zeros = book
        .entries()
        .filter(|entry| entry.address == "10.0.0.0:4500")
        .count();
    assert_eq!(zeros, 1);
}

#[test]
fn forget_and_clear_are_saved() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("prefs.json");

    let mut book = AddressBook::open(&path);
    book.touch("desk:4500").unwrap();
    book.touch("laptop:4500").unwrap();

    assert!(book.forget("desk:4500").unwrap());
    assert!(!book.forget("desk:4500").unwrap());
    assert_eq!(AddressBook::load_from_path(&path).unwrap().len(), 1);

    book.clear().unwrap();
    assert!(AddressBook::load_from_path(&path).unwrap().is_empty());
}

#[test]
fn blank_address_is_not_recorded() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let mut book = AddressBook::open(dir.path().join("prefs.json"));

    book.touch("   ").unwrap();
    assert!(book.is_empty());
}

#[tokio::test]
async fn shared_book_saves_from_async_callers() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("prefs.json");
    let shared = SharedAddressBook::new(AddressBook::open(&path));

    shared.touch("desk:4500".to_owned()).await.unwrap();
    shared.touch("laptop:4500".to_owned()).await.unwrap();
    assert!(shared.forget("desk:4500".to_owned()).await.unwrap());

    let addresses: Vec<String> = shared.entries().into_iter().map(|entry| entry.address).collect();
    assert_eq!(addresses, vec!["laptop:4500".to_owned()]);

    let reloaded = AddressBook::load_from_path(&path).expect("reload prefs.json");
    assert_eq!(reloaded.latest(), Some("laptop:4500"));
    assert_eq!(reloaded.len(), 1);
}
