mod helpers;

use std::time::Duration;

use context_keeper::environment::EnvTarget;
use context_keeper::KeeperError;
use helpers::fixture::Fixture;

#[test]
fn test_snapshots_list_newest_first_and_cleanup_keeps_last() {
    let fx = Fixture::new();
    let keeper = fx.keeper();

    let mut kept = Vec::new();
    for _ in 0..5 {
        kept.push(keeper.keep_environment("work").unwrap().file_name);
        fx.clock.advance(Duration::from_secs(1));
    }

    let listed: Vec<String> = keeper
        .list_environment("work")
        .unwrap()
        .into_iter()
        .map(|f| f.file_name)
        .collect();
    let mut newest_first = kept.clone();
    newest_first.reverse();
    assert_eq!(listed, newest_first);

    assert_eq!(keeper.cleanup_environment("work", 3).unwrap(), 2);
    let remaining: Vec<String> = keeper
        .list_environment("work")
        .unwrap()
        .into_iter()
        .map(|f| f.file_name)
        .collect();
    assert_eq!(remaining, newest_first[..3].to_vec());

    assert_eq!(keeper.cleanup_environment("work", 3).unwrap(), 0);
}

#[test]
fn test_same_second_snapshots_get_distinct_files() {
    let fx = Fixture::new();
    let keeper = fx.keeper();

    let first = keeper.keep_environment("work").unwrap();
    let second = keeper.keep_environment("work").unwrap();
    assert_ne!(first.file_name, second.file_name);
    assert_eq!(first.stamp, second.stamp);
    assert!(second.seq > first.seq);

    let listed = keeper.list_environment("work").unwrap();
    assert_eq!(listed[0].file_name, second.file_name);
}

#[test]
fn test_restore_reverts_environment_changes() {
    let fx = Fixture::new();
    let keeper = fx.keeper();
    let original = fx.env.vars();
    keeper.keep_environment("work").unwrap();

    fx.env.set("PROJECT", "other");
    fx.env.set("SCRATCH", "1");

    let restore = keeper.restore_environment("work").unwrap();
    assert_eq!(restore.removed, vec!["SCRATCH"]);
    assert_eq!(restore.changed, vec!["PROJECT"]);
    assert!(restore.added.is_empty());
    assert_eq!(fx.env.vars(), original);
    assert!(restore.script_path.is_file());
}

#[test]
fn test_restore_without_snapshot_is_not_found() {
    let fx = Fixture::new();
    let keeper = fx.keeper();
    assert!(matches!(
        keeper.restore_environment("never-kept"),
        Err(KeeperError::NotFound(_))
    ));
    assert!(keeper.list_environment("never-kept").unwrap().is_empty());
}
