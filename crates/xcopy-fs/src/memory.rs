//! In-memory backend
//!
//! Each volume is a sorted map from `/`-separated relative paths to entries,
//! with the empty path standing for the volume root. Drive directory
//! identifiers are these paths. Faults can be injected per directory or file
//! to exercise failure handling without a real filesystem.

use crate::placement::{check_name, free_name, place, Placement};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;
use xcopy_types::{
    Backend, BatchResult, EntityKind, EntryOutcome, Error, FileRequest, Location, MkdirsRequest,
    MvdirsRequest, PolicyPair, Resolved, Result, Stat, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Dir,
    File(Vec<u8>),
}

impl Entry {
    fn kind(&self) -> EntityKind {
        match self {
            Self::Dir => EntityKind::Directory,
            Self::File(_) => EntityKind::File,
        }
    }
}

#[derive(Debug, Default)]
struct Volume {
    entries: BTreeMap<String, Entry>,
}

impl Volume {
    fn kind_of(&self, path: &str) -> Option<EntityKind> {
        if path.is_empty() {
            return Some(EntityKind::Directory);
        }
        self.entries.get(path).map(Entry::kind)
    }

    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a str, &'a Entry)> + 'a {
        self.entries.iter().filter_map(move |(path, entry)| {
            let (parent, name) = split(path);
            (parent == dir).then_some((name, entry))
        })
    }

    fn has_children(&self, dir: &str) -> bool {
        self.children(dir).next().is_some()
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{}/", path);
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    fn move_tree(&mut self, from: &str, to: &str) {
        let prefix = format!("{}/", from);
        let moved: Vec<String> = self
            .entries
            .keys()
            .filter(|key| *key == from || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(entry) = self.entries.remove(&key) {
                let renamed = format!("{}{}", to, &key[from.len()..]);
                self.entries.insert(renamed, entry);
            }
        }
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = join(&current, part);
            self.entries.entry(current.clone()).or_insert(Entry::Dir);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FaultSite {
    Readdir,
    Mkdirs,
    Copy,
}

#[derive(Debug, Default)]
struct State {
    volumes: HashMap<String, Volume>,
    faults: HashMap<(FaultSite, String, String), Error>,
}

impl State {
    fn volume(&self, id: &str) -> Result<&Volume> {
        self.volumes
            .get(id)
            .ok_or_else(|| Error::not_found(format!("volume {}", id)))
    }

    fn volume_mut(&mut self, id: &str) -> Result<&mut Volume> {
        self.volumes
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("volume {}", id)))
    }

    fn fault(&self, site: FaultSite, volume: &str, path: &str) -> Result<()> {
        match self
            .faults
            .get(&(site, volume.to_string(), path.to_string()))
        {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Backend keeping drives and native filesystems in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Create a backend without volumes
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_volume(&self, id: &str) {
        self.state()
            .volumes
            .insert(id.to_string(), Volume::default());
    }

    /// Add an empty drive
    pub fn add_drive(&self, id: &str) {
        self.add_volume(id);
    }

    /// Add an empty native filesystem; drives and native filesystems share one id space
    pub fn add_native(&self, id: &str) {
        self.add_volume(id);
    }

    /// Create a directory and its missing parents
    pub fn mkdir_p(&self, volume: &str, path: &str) {
        if let Some(volume) = self.state().volumes.get_mut(volume) {
            volume.mkdir_p(path);
        }
    }

    /// Write a file, creating its missing parents
    pub fn write_file(&self, volume: &str, path: &str, data: &[u8]) {
        if let Some(volume) = self.state().volumes.get_mut(volume) {
            let (parent, _) = split(path);
            volume.mkdir_p(parent);
            volume
                .entries
                .insert(path.to_string(), Entry::File(data.to_vec()));
        }
    }

    /// Contents of a file
    pub fn read_file(&self, volume: &str, path: &str) -> Option<Vec<u8>> {
        match self.state().volumes.get(volume)?.entries.get(path)? {
            Entry::File(data) => Some(data.clone()),
            Entry::Dir => None,
        }
    }

    /// Whether an entry exists at `path`
    pub fn exists(&self, volume: &str, path: &str) -> bool {
        self.kind(volume, path).is_some()
    }

    /// Whether a directory exists at `path`
    pub fn is_dir(&self, volume: &str, path: &str) -> bool {
        self.kind(volume, path) == Some(EntityKind::Directory)
    }

    fn kind(&self, volume: &str, path: &str) -> Option<EntityKind> {
        self.state().volumes.get(volume)?.kind_of(path)
    }

    /// Sorted names inside the directory at `path`
    pub fn list(&self, volume: &str, path: &str) -> Vec<String> {
        let state = self.state();
        let Some(volume) = state.volumes.get(volume) else {
            return Vec::new();
        };
        let mut names: Vec<String> = volume.children(path).map(|(n, _)| n.to_string()).collect();
        names.sort();
        names
    }

    /// Make every listing of `dir` fail with `error`
    pub fn fail_readdir(&self, volume: &str, dir: &str, error: Error) {
        self.inject(FaultSite::Readdir, volume, dir, error);
    }

    /// Make every directory batch inside `dir` fail with `error`
    pub fn fail_mkdirs(&self, volume: &str, dir: &str, error: Error) {
        self.inject(FaultSite::Mkdirs, volume, dir, error);
    }

    /// Make every copy or move of the file at `path` fail with `error`
    pub fn fail_copy(&self, volume: &str, path: &str, error: Error) {
        self.inject(FaultSite::Copy, volume, path, error);
    }

    fn inject(&self, site: FaultSite, volume: &str, path: &str, error: Error) {
        self.state()
            .faults
            .insert((site, volume.to_string(), path.to_string()), error);
    }

    fn transfer(&self, request: &FileRequest, remove_source: bool) -> Result<EntryOutcome> {
        check_name(&request.name)?;
        let (src_volume, src_dir) = address(&request.src)?;
        let (dst_volume, dst_dir) = address(&request.dst)?;
        let from = join(&src_dir, &request.name);

        let mut state = self.state();
        state.fault(FaultSite::Copy, src_volume, &from)?;
        let data = match state.volume(src_volume)?.entries.get(&from) {
            Some(Entry::File(data)) => data.clone(),
            _ => return Err(Error::not_found(format!("{}:{}", src_volume, from))),
        };

        let target = state.volume_mut(dst_volume)?;
        if target.kind_of(&dst_dir) != Some(EntityKind::Directory) {
            return Err(Error::not_found(request.dst.to_string()));
        }
        let (name, resolved) =
            match settle(target, &request.dst, &dst_dir, &request.name, EntityKind::File, request.policy)? {
                Ok(settled) => settled,
                Err(existing) => return Ok(existing),
            };
        target.entries.insert(join(&dst_dir, &name), Entry::File(data));

        if remove_source {
            state.volume_mut(src_volume)?.entries.remove(&from);
        }
        trace!(
            "{} {}/{} -> {}/{}",
            if remove_source { "moved" } else { "copied" },
            request.src,
            request.name,
            request.dst,
            name
        );
        Ok(EntryOutcome::resolved(
            stat(&request.dst, &dst_dir, &name, EntityKind::File),
            resolved,
        ))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn readdir(&self, _user: UserId, dir: &Location) -> Result<Vec<Stat>> {
        let (volume, path) = address(dir)?;
        let state = self.state();
        state.fault(FaultSite::Readdir, volume, &path)?;
        let volume = state.volume(volume)?;
        if volume.kind_of(&path) != Some(EntityKind::Directory) {
            return Err(Error::not_found(dir.to_string()));
        }
        let mut stats: Vec<Stat> = volume
            .children(&path)
            .map(|(name, entry)| stat(dir, &path, name, entry.kind()))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    async fn mkdirs(&self, _user: UserId, request: MkdirsRequest) -> Result<BatchResult> {
        let (volume, dir) = address(&request.dir)?;
        let mut state = self.state();
        state.fault(FaultSite::Mkdirs, volume, &dir)?;
        let volume = state.volume_mut(volume)?;
        if volume.kind_of(&dir) != Some(EntityKind::Directory) {
            return Err(Error::not_found(request.dir.to_string()));
        }

        let mut results = BatchResult::new();
        for name in &request.names {
            let outcome = check_name(name)
                .and_then(|()| {
                    settle(volume, &request.dir, &dir, name, EntityKind::Directory, request.policy)
                })
                .map(|settled| match settled {
                    Ok((created, resolved)) => {
                        volume.entries.insert(join(&dir, &created), Entry::Dir);
                        EntryOutcome::resolved(
                            stat(&request.dir, &dir, &created, EntityKind::Directory),
                            resolved,
                        )
                    }
                    Err(existing) => existing,
                })
                .unwrap_or_else(EntryOutcome::failed);
            results.insert(name.clone(), outcome);
        }
        Ok(results)
    }

    async fn mvdirs(&self, _user: UserId, request: MvdirsRequest) -> Result<BatchResult> {
        let (src_volume, src_dir) = address(&request.src)?;
        let (dst_volume, dst_dir) = address(&request.dst)?;
        if request.src.is_native() || request.dst.is_native() || src_volume != dst_volume {
            return Err(Error::not_implemented(format!(
                "moving directories from {} to {}",
                request.src, request.dst
            )));
        }

        let mut state = self.state();
        state.fault(FaultSite::Mkdirs, dst_volume, &dst_dir)?;
        let volume = state.volume_mut(dst_volume)?;
        let mut results = BatchResult::new();
        for name in &request.names {
            let from = join(&src_dir, name);
            let outcome = check_name(name)
                .and_then(|()| {
                    if volume.kind_of(&from) == Some(EntityKind::Directory) {
                        Ok(())
                    } else {
                        Err(Error::not_found(format!("{}:{}", src_volume, from)))
                    }
                })
                .and_then(|()| {
                    settle(volume, &request.dst, &dst_dir, name, EntityKind::Directory, request.policy)
                })
                .map(|settled| match settled {
                    Ok((moved, resolved)) => {
                        volume.move_tree(&from, &join(&dst_dir, &moved));
                        EntryOutcome::resolved(
                            stat(&request.dst, &dst_dir, &moved, EntityKind::Directory),
                            resolved,
                        )
                    }
                    Err(existing) => existing,
                })
                .unwrap_or_else(EntryOutcome::failed);
            results.insert(name.clone(), outcome);
        }
        Ok(results)
    }

    async fn copy_file(&self, _user: UserId, request: FileRequest) -> Result<EntryOutcome> {
        self.transfer(&request, false)
    }

    async fn move_file(&self, _user: UserId, request: FileRequest) -> Result<EntryOutcome> {
        if request.src.is_native() || request.dst.is_native() {
            return Err(Error::not_implemented(format!(
                "moving files from {} to {}",
                request.src, request.dst
            )));
        }
        self.transfer(&request, true)
    }

    async fn remove_empty_dir(&self, _user: UserId, dir: &Location) -> Result<bool> {
        let (volume, path) = address(dir)?;
        let mut state = self.state();
        let volume = state.volume_mut(volume)?;
        if path.is_empty()
            || volume.kind_of(&path) != Some(EntityKind::Directory)
            || volume.has_children(&path)
        {
            return Ok(false);
        }
        volume.entries.remove(&path);
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Clear the way for `name` in `dir` under `policy`
///
/// `Ok(Err(outcome))` reports an occupant that stays in place.
fn settle(
    volume: &mut Volume,
    location: &Location,
    dir: &str,
    name: &str,
    incoming: EntityKind,
    policy: PolicyPair,
) -> Result<std::result::Result<(String, Resolved), EntryOutcome>> {
    let target = join(dir, name);
    match place(name, incoming, volume.kind_of(&target), policy)? {
        Placement::Existing { kind, resolved } => Ok(Err(EntryOutcome::resolved(
            stat(location, dir, name, kind),
            resolved,
        ))),
        Placement::Create { replace, resolved } => {
            if replace {
                volume.remove_tree(&target);
            }
            Ok(Ok((name.to_string(), resolved)))
        }
        Placement::Rename { resolved } => {
            let free = free_name(name, |candidate| {
                volume.entries.contains_key(&join(dir, candidate))
            });
            Ok(Ok((free, resolved)))
        }
    }
}

/// Volume id and normalized path of a location
fn address(location: &Location) -> Result<(&str, String)> {
    let raw = match location {
        Location::Drive { dir, .. } => Path::new(dir.as_str()),
        Location::Native { path, .. } => path.as_path(),
    };
    let mut parts = Vec::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| Error::invalid_request(format!("{} is not UTF-8", location)))?,
            ),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::invalid_request(format!("{} leaves its root", location)));
            }
        }
    }
    Ok((location.volume(), parts.join("/")))
}

fn stat(location: &Location, dir: &str, name: &str, kind: EntityKind) -> Stat {
    let stat = Stat {
        name: name.to_string(),
        kind,
        uuid: None,
    };
    if location.is_drive() {
        stat.with_uuid(join(dir, name))
    } else {
        stat
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn split(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use xcopy_types::Policy;

    const USER: Uuid = Uuid::nil();

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_drive("d");
        backend.write_file("d", "src/a.txt", b"a");
        backend.mkdir_p("d", "src/sub/deep");
        backend.mkdir_p("d", "dst");
        backend
    }

    fn file(name: &str, policy: PolicyPair) -> FileRequest {
        FileRequest {
            src: Location::drive("d", "src"),
            dst: Location::drive("d", "dst"),
            name: name.to_string(),
            policy,
        }
    }

    #[tokio::test]
    async fn test_readdir() {
        let backend = backend();
        let stats = backend
            .readdir(USER, &Location::drive("d", "src"))
            .await
            .unwrap();
        assert_eq!(
            stats,
            vec![
                Stat::file("a.txt").with_uuid("src/a.txt"),
                Stat::dir("sub").with_uuid("src/sub"),
            ]
        );
        let err = backend
            .readdir(USER, &Location::drive("d", "src/a.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_native_stats_have_no_identifier() {
        let backend = backend();
        backend.add_native("usb");
        backend.write_file("usb", "pics/1.jpg", b"1");
        let stats = backend
            .readdir(USER, &Location::native("usb", "pics"))
            .await
            .unwrap();
        assert_eq!(stats, vec![Stat::file("1.jpg")]);
    }

    #[tokio::test]
    async fn test_mkdirs_reports_per_entry() {
        let backend = backend();
        backend.mkdir_p("d", "dst/taken");
        let results = backend
            .mkdirs(
                USER,
                MkdirsRequest {
                    dir: Location::drive("d", "dst"),
                    names: vec!["new".into(), "taken".into(), "a/b".into()],
                    policy: PolicyPair::NONE,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            results["new"],
            EntryOutcome::created(Stat::dir("new").with_uuid("dst/new"))
        );
        assert!(results["taken"].is_conflict());
        assert_eq!(results["a/b"].error.as_ref().map(Error::code), Some("EINVAL"));
        assert!(backend.is_dir("d", "dst/new"));
    }

    #[tokio::test]
    async fn test_replace_drops_the_occupant_tree() {
        let backend = backend();
        backend.write_file("d", "dst/sub/old.txt", b"old");
        let results = backend
            .mkdirs(
                USER,
                MkdirsRequest {
                    dir: Location::drive("d", "dst"),
                    names: vec!["sub".into()],
                    policy: PolicyPair::both(Policy::Replace),
                },
            )
            .await
            .unwrap();
        assert_eq!(results["sub"].resolved, Resolved::SAME);
        assert!(backend.is_dir("d", "dst/sub"));
        assert!(!backend.exists("d", "dst/sub/old.txt"));
    }

    #[tokio::test]
    async fn test_mvdirs_moves_subtree() {
        let backend = backend();
        let results = backend
            .mvdirs(
                USER,
                MvdirsRequest {
                    src: Location::drive("d", "src"),
                    dst: Location::drive("d", "dst"),
                    names: vec!["sub".into()],
                    policy: PolicyPair::NONE,
                },
            )
            .await
            .unwrap();
        assert_eq!(results["sub"].stat, Some(Stat::dir("sub").with_uuid("dst/sub")));
        assert!(backend.is_dir("d", "dst/sub/deep"));
        assert!(!backend.exists("d", "src/sub"));
    }

    #[tokio::test]
    async fn test_file_transfer() {
        let backend = backend();
        backend.write_file("d", "dst/a.txt", b"old");

        let err = backend.copy_file(USER, file("a.txt", PolicyPair::NONE)).await.unwrap_err();
        assert!(err.is_conflict());

        let outcome = backend
            .copy_file(USER, file("a.txt", PolicyPair::both(Policy::Rename)))
            .await
            .unwrap();
        assert_eq!(outcome.stat, Some(Stat::file("a (2).txt").with_uuid("dst/a (2).txt")));
        assert_eq!(backend.read_file("d", "dst/a (2).txt"), Some(b"a".to_vec()));

        let outcome = backend
            .move_file(USER, file("a.txt", PolicyPair::both(Policy::Skip)))
            .await
            .unwrap();
        assert_eq!(outcome.resolved, Resolved::SAME);
        assert_eq!(backend.read_file("d", "dst/a.txt"), Some(b"old".to_vec()));
        // a skipped move leaves the source alone
        assert!(backend.exists("d", "src/a.txt"));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let backend = backend();
        backend.fail_readdir("d", "src", Error::io("disk gone"));
        backend.fail_copy("d", "src/a.txt", Error::PermissionDenied { path: "a.txt".into() });

        let err = backend
            .readdir(USER, &Location::drive("d", "src"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EIO");
        let err = backend.copy_file(USER, file("a.txt", PolicyPair::NONE)).await.unwrap_err();
        assert_eq!(err.code(), "EACCES");
    }

    #[tokio::test]
    async fn test_remove_empty_dir() {
        let backend = backend();
        let user = USER;
        assert!(!backend.remove_empty_dir(user, &Location::drive("d", "src/sub")).await.unwrap());
        assert!(backend.remove_empty_dir(user, &Location::drive("d", "src/sub/deep")).await.unwrap());
        assert!(!backend.remove_empty_dir(user, &Location::drive("d", "src/sub/deep")).await.unwrap());
        assert!(!backend.remove_empty_dir(user, &Location::drive("d", "")).await.unwrap());
        assert_eq!(backend.list("d", "src"), vec!["a.txt", "sub"]);
    }
}
