use color_eyre::Result;
use lethe_lib::pool::Pool;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

// sha256("abc"), a published test vector.
const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn entries(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .expect("read pool root")
        .map(|entry| entry.expect("read pool entry").path())
        .collect()
}

#[tokio::test]
async fn entry_is_named_by_content_digest() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pool = Pool::builder().root(tmp.path().to_path_buf()).build()?;

    let candidate = tmp.path().join("candidate");
    let dst = tmp.path().join("dst");
    tokio::fs::write(&candidate, b"abc").await?;

    let entry = pool.link_into(&candidate, &dst, false).await?;
    assert_eq!(entry, tmp.path().join(ABC_SHA256));
    assert_eq!(tokio::fs::read(&entry).await?, b"abc");
    Ok(())
}

#[tokio::test]
async fn consumed_candidate_is_moved_and_destination_linked() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pool_root = tmp.path().join("pool");
    tokio::fs::create_dir(&pool_root).await?;
    let pool = Pool::builder().root(&pool_root).build()?;

    let candidate = tmp.path().join("candidate");
    let dst = tmp.path().join("dst");
    tokio::fs::write(&candidate, b"payload").await?;

    let entry = pool.link_into(&candidate, &dst, false).await?;

    assert!(!candidate.exists(), "candidate must be consumed");
    assert!(entry.exists());
    assert!(std::fs::symlink_metadata(&dst)?.file_type().is_symlink());
    assert_eq!(std::fs::read_link(&dst)?, entry);
    assert_eq!(tokio::fs::read(&dst).await?, b"payload");
    Ok(())
}

#[tokio::test]
async fn preserved_candidate_is_left_in_place() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pool_root = tmp.path().join("pool");
    tokio::fs::create_dir(&pool_root).await?;
    let pool = Pool::builder().root(&pool_root).build()?;

    let candidate = tmp.path().join("source");
    let dst = tmp.path().join("dst");
    tokio::fs::write(&candidate, b"payload").await?;

    pool.link_into(&candidate, &dst, true).await?;

    assert!(candidate.exists(), "preserved candidate must survive");
    assert_eq!(tokio::fs::read(&candidate).await?, b"payload");
    assert_eq!(tokio::fs::read(&dst).await?, b"payload");
    Ok(())
}

#[tokio::test]
async fn identical_bytes_share_one_entry() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pool_root = tmp.path().join("pool");
    tokio::fs::create_dir(&pool_root).await?;
    let pool = Pool::builder().root(&pool_root).build()?;

    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    tokio::fs::write(&first, b"same bytes").await?;
    tokio::fs::write(&second, b"same bytes").await?;

    let dst1 = tmp.path().join("dst1");
    let dst2 = tmp.path().join("dst2");
    pool.link_into(&first, &dst1, false).await?;
    assert_eq!(entries(&pool_root).len(), 1);

    pool.link_into(&second, &dst2, false).await?;
    assert_eq!(entries(&pool_root).len(), 1, "duplicate bytes must not grow the pool");
    assert!(!second.exists(), "losing candidate must be discarded");
    assert_eq!(std::fs::read_link(&dst1)?, std::fs::read_link(&dst2)?);
    Ok(())
}

#[tokio::test]
async fn existing_destination_is_replaced_with_link() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pool_root = tmp.path().join("pool");
    tokio::fs::create_dir(&pool_root).await?;
    let pool = Pool::builder().root(&pool_root).build()?;

    let candidate = tmp.path().join("candidate");
    let dst = tmp.path().join("dst");
    tokio::fs::write(&candidate, b"new").await?;
    tokio::fs::write(&dst, b"stale").await?;

    pool.link_into(&candidate, &dst, false).await?;

    assert!(std::fs::symlink_metadata(&dst)?.file_type().is_symlink());
    assert_eq!(tokio::fs::read(&dst).await?, b"new");
    Ok(())
}

#[tokio::test]
async fn builder_requires_existing_root() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let result = Pool::builder().root(tmp.path().join("missing")).build();
    assert!(result.is_err());
    Ok(())
}
