//! End-to-end scenarios (spec.md section 8).

use fscore::testing::{RamDisk, RamFreeMap, TestTask};
use fscore::{FsConfig, Filesystem};

fn mount() -> (Filesystem<RamDisk, RamFreeMap>, TestTask) {
    let _ = env_logger::builder().is_test(true).try_init();
    let disk = RamDisk::new(8192);
    let freemap = RamFreeMap::new(8192);
    freemap.mark_used(0, 2);
    let fs = Filesystem::mount(disk, freemap, FsConfig::default()).unwrap();
    let task = TestTask::new(1);
    (fs, task)
}

#[test]
fn s1_basic_read_write() {
    let (fs, task) = mount();
    fs.create(&task, "/a", 0).unwrap();
    let mut f = fs.open(&task, "/a").unwrap();
    let n = fs.write(&mut f, b"hello").unwrap();
    assert_eq!(n, 5);
    fs.close(f).unwrap();

    let mut f = fs.open(&task, "/a").unwrap();
    let mut buf = [0u8; 5];
    let n = fs.read(&mut f, &mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"hello");
    fs.close(f).unwrap();
}

#[test]
fn s2_growth_past_single_indirect() {
    let (fs, task) = mount();
    fs.create(&task, "/big", 0).unwrap();
    let mut f = fs.open(&task, "/big").unwrap();
    let zeros = vec![0u8; 100_000];
    fs.write(&mut f, &zeros).unwrap();
    assert_eq!(fs.filesize(&f), 100_000);
    let mut byte = [0xffu8; 1];
    fs.seek(&mut f, 99_999);
    fs.read(&mut f, &mut byte).unwrap();
    assert_eq!(byte[0], 0);
    fs.seek(&mut f, 512);
    fs.read(&mut f, &mut byte).unwrap();
    assert_eq!(byte[0], 0);
    fs.close(f).unwrap();

    let f = fs.open(&task, "/big").unwrap();
    assert_eq!(fs.filesize(&f), 100_000);
    fs.close(f).unwrap();
}

#[test]
fn s3_sparse_write() {
    let (fs, task) = mount();
    fs.create(&task, "/sparse", 0).unwrap();
    let mut f = fs.open(&task, "/sparse").unwrap();
    fs.seek(&mut f, 10_000);
    fs.write(&mut f, b"X").unwrap();
    assert_eq!(fs.filesize(&f), 10_001);
    let mut byte = [0xffu8; 1];
    fs.seek(&mut f, 5_000);
    fs.read(&mut f, &mut byte).unwrap();
    assert_eq!(byte[0], 0);
    fs.seek(&mut f, 10_000);
    fs.read(&mut f, &mut byte).unwrap();
    assert_eq!(byte[0], b'X');
    fs.close(f).unwrap();
}

#[test]
fn s4_nested_mkdir() {
    let (fs, task) = mount();
    fs.mkdir(&task, "/d").unwrap();
    fs.chdir(&task, "/d").unwrap();
    let d_sector = task.cwd();
    fs.mkdir(&task, "sub").unwrap();
    fs.chdir(&task, "sub").unwrap();
    fs.create(&task, "f", 0).unwrap();

    let sub = fs.open(&task, ".").unwrap();
    assert!(fs.isdir(&sub));
    let parent = fs.open(&task, "..").unwrap();
    assert_eq!(fs.inumber(&parent), d_sector);
    fs.close(parent).unwrap();
    fs.close(sub).unwrap();
}

#[test]
fn s5_remove_busy() {
    let (fs, task) = mount();
    fs.mkdir(&task, "/d").unwrap();
    fs.chdir(&task, "/d").unwrap();

    let other = TestTask::new(1);
    assert!(fs.remove(&other, "/d").is_err());

    fs.chdir(&task, "/").unwrap();
    fs.remove(&other, "/d").unwrap();
    assert!(fs.open(&task, "/d").is_err());
}

#[test]
fn s6_dup_add() {
    let (fs, task) = mount();
    fs.mkdir(&task, "/empty").unwrap();
    fs.chdir(&task, "/empty").unwrap();
    fs.create(&task, "x", 0).unwrap();
    assert!(fs.create(&task, "x", 0).is_err());

    let mut dir = fs.open(&task, ".").unwrap();
    let mut names = vec![];
    while let Some(name) = fs.readdir(&mut dir).unwrap() {
        names.push(name);
    }
    assert_eq!(names, vec!["x".to_string()]);
    fs.close(dir).unwrap();
}
