use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use super::*;
use crate::fs::make_writable_recursive;

fn staged_hash(root: &Path, contents: &[u8]) -> Result<ContentHash> {
    let scratch = tempfile::tempdir_in(root)?;
    fs::write(scratch.path().join("payload.bin"), contents)?;
    tree_hash(scratch.path())
}

fn publish(store: &ContentStore, contents: &[u8]) -> Result<ContentHash> {
    let hash = staged_hash(store.root(), contents)?;
    let mut reservation = store.reserve(&hash)?;
    let staging = reservation.stage()?;
    fs::write(staging.join("payload.bin"), contents)?;
    reservation.publish()?;
    Ok(hash)
}

#[test]
fn path_is_derived_from_the_hex_hash() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path().join("store"))?;
    let hash = ContentHash::from_bytes([0xab; 32]);
    assert_eq!(store.path(&hash), dir.path().join("store").join(hash.to_hex()));
    assert!(!store.exists(&hash));
    assert!(store.root().join(".locks").is_dir());
    assert!(store.root().join(".tmp").is_dir());
    Ok(())
}

#[test]
fn publish_makes_content_visible_and_read_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = publish(&store, b"payload")?;
    assert!(store.exists(&hash));
    assert_eq!(fs::read(store.path(&hash).join("payload.bin"))?, b"payload");
    assert!(store.verify(&hash)?);
    let perms = fs::metadata(store.path(&hash).join("payload.bin"))?.permissions();
    assert!(perms.readonly());
    Ok(())
}

#[test]
fn dropped_reservation_leaves_nothing_behind() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = ContentHash::from_bytes([3; 32]);
    {
        let mut reservation = store.reserve(&hash)?;
        let staging = reservation.stage()?.to_path_buf();
        fs::write(staging.join("partial"), b"half written")?;
        assert!(staging.exists());
    }
    assert!(!store.exists(&hash));
    assert_eq!(fs::read_dir(store.root().join(".tmp"))?.count(), 0);

    // A later writer can still claim the hash.
    let mut reservation = store.reserve(&hash)?;
    assert!(!reservation.is_published());
    reservation.stage()?;
    Ok(())
}

#[test]
fn restaging_discards_the_previous_attempt() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = ContentHash::from_bytes([4; 32]);
    let mut reservation = store.reserve(&hash)?;
    let first = reservation.stage()?.to_path_buf();
    fs::write(first.join("wrong"), b"wrong tree")?;
    let second = reservation.stage()?.to_path_buf();
    assert!(!first.exists());
    assert_eq!(fs::read_dir(&second)?.count(), 0);
    Ok(())
}

#[test]
fn publishing_without_staging_is_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = ContentHash::from_bytes([5; 32]);
    let reservation = store.reserve(&hash)?;
    assert!(reservation.publish().is_err());
    assert!(!store.exists(&hash));
    Ok(())
}

#[test]
fn same_hash_reservations_are_serialized() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = staged_hash(store.root(), b"shared")?;
    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));
    let populated = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..writers)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let populated = Arc::clone(&populated);
            let inside = Arc::clone(&inside);
            thread::spawn(move || -> Result<PathBuf> {
                barrier.wait();
                let mut reservation = store.reserve(&hash)?;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "lock held twice");
                let published = reservation.is_published();
                if !published {
                    populated.fetch_add(1, Ordering::SeqCst);
                    let staging = reservation.stage()?.to_path_buf();
                    fs::write(staging.join("payload.bin"), b"shared")?;
                    thread::sleep(std::time::Duration::from_millis(20));
                }
                inside.fetch_sub(1, Ordering::SeqCst);
                if published {
                    Ok(store.path(&hash))
                } else {
                    reservation.publish()
                }
            })
        })
        .collect();

    for handle in handles {
        let path = handle.join().expect("writer thread")?;
        assert_eq!(path, store.path(&hash));
    }
    assert_eq!(populated.load(Ordering::SeqCst), 1);
    assert_eq!(store.list()?, vec![hash]);
    Ok(())
}

#[test]
fn list_skips_bookkeeping_and_foreign_names() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let a = publish(&store, b"a")?;
    let b = publish(&store, b"b")?;
    fs::create_dir_all(store.root().join("not-a-hash"))?;
    fs::create_dir_all(store.root().join(a.to_hex().to_uppercase()))?;
    fs::write(store.root().join(ContentHash::from_bytes([9; 32]).to_hex()), b"file")?;

    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(store.list()?, expected);
    Ok(())
}

#[test]
fn remove_deletes_read_only_trees() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = publish(&store, b"doomed")?;
    assert!(store.remove(&hash)?);
    assert!(!store.exists(&hash));
    assert!(!store.remove(&hash)?);
    assert!(store.list()?.is_empty());
    assert_eq!(fs::read_dir(store.root().join(".tmp"))?.count(), 0);
    assert_eq!(fs::read_dir(store.root().join(".locks"))?.count(), 0);
    Ok(())
}

#[cfg(unix)]
#[test]
fn waiters_survive_a_pruned_lock_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = staged_hash(store.root(), b"contended")?;
    let held = store.reserve(&hash)?;

    let waiter = {
        let store = store.clone();
        thread::spawn(move || -> Result<bool> {
            let mut reservation = store.reserve(&hash)?;
            let staging = reservation.stage()?.to_path_buf();
            fs::write(staging.join("payload.bin"), b"contended")?;
            reservation.publish()?;
            Ok(store.root().join(".locks").join(format!("{hash}.lock")).exists())
        })
    };
    thread::sleep(std::time::Duration::from_millis(50));
    fs::remove_file(store.root().join(".locks").join(format!("{hash}.lock")))?;
    drop(held);

    assert!(waiter.join().expect("waiter thread")?, "waiter relocked a live file");
    assert!(store.verify(&hash)?);
    Ok(())
}

#[test]
fn verify_detects_tampering() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ContentStore::new(dir.path())?;
    let hash = publish(&store, b"original")?;
    assert!(store.verify(&hash)?);

    let path = store.path(&hash);
    make_writable_recursive(&path);
    fs::write(path.join("payload.bin"), b"tampered")?;
    assert!(!store.verify(&hash)?);
    assert!(!store.verify(&ContentHash::from_bytes([1; 32]))?);
    Ok(())
}
