use datajpa_core::{
    CrudRepository, Managed, Member, MemberRepository, Session, SessionConfig, SessionId,
    SqliteMemberRepository,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

fn seeded_file(dir: &Path) -> PathBuf {
    let path = dir.join("isolation.sqlite3");
    let session = Session::open_file(&path, SessionConfig::default()).unwrap();
    {
        let repo = SqliteMemberRepository::try_new(&session).unwrap();
        for index in 1..=3 {
            repo.save(Member::new(format!("member{index}"), 10)).unwrap();
        }
    }
    session.commit().unwrap();
    path
}

#[test]
fn concurrent_sessions_keep_separate_identity_maps() {
    let dir = tempfile::tempdir().unwrap();
    let path = seeded_file(dir.path());
    let barrier = Arc::new(Barrier::new(2));

    let workers: Vec<_> = [21, 42]
        .into_iter()
        .map(|age| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> (SessionId, i32, usize) {
                let session = Session::open_file(&path, SessionConfig::default()).unwrap();
                let repo = SqliteMemberRepository::try_new(&session).unwrap();

                let first = repo.find_by_username("member1").unwrap().remove(0);
                first.borrow_mut().age = age;
                barrier.wait();

                let again = repo.get_by_id(1).unwrap();
                assert!(Managed::same_instance(&first, &again));
                let seen = again.borrow().age;
                let cached = session.cached_count();
                let id = session.id();
                drop(repo);
                session.rollback().unwrap();
                (id, seen, cached)
            })
        })
        .collect();

    let results: Vec<_> = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();

    assert_ne!(results[0].0, results[1].0);
    assert_eq!(results[0].1, 21);
    assert_eq!(results[1].1, 42);
    assert!(results.iter().all(|(_, _, cached)| *cached == 1));

    let session = Session::open_file(&path, SessionConfig::default()).unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    assert_eq!(repo.get_by_id(1).unwrap().borrow().age, 10);
}

#[test]
fn committed_work_is_visible_to_later_sessions_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = seeded_file(dir.path());

    let writer = {
        let path = path.clone();
        thread::spawn(move || {
            let session = Session::open_file(&path, SessionConfig::default()).unwrap();
            {
                let repo = SqliteMemberRepository::try_new(&session).unwrap();
                assert_eq!(repo.bulk_age_plus(10).unwrap(), 3);
            }
            session.commit().unwrap();
        })
    };
    writer.join().unwrap();

    let session = Session::open_file(&path, SessionConfig::default()).unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    assert_eq!(repo.count_by_age(11).unwrap(), 3);
    assert_eq!(repo.count_by_age(10).unwrap(), 0);
}

#[test]
fn sessions_on_separate_stores_do_not_share_rows() {
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            thread::spawn(move || {
                let session = Session::open_in_memory().unwrap();
                let repo = SqliteMemberRepository::try_new(&session).unwrap();
                for index in 0..=worker {
                    repo.save(Member::new(format!("w{worker}-{index}"), 20))
                        .unwrap();
                }
                repo.count().unwrap()
            })
        })
        .collect();

    let counts: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(counts, vec![1, 2, 3, 4]);
}
