//! Backend over the local filesystem
//!
//! Every drive and native filesystem is a configured root directory. Drive
//! directories are identified by their path relative to the drive root, with
//! `/` separators and `""` for the root itself; native directories are
//! addressed by relative path.

use crate::copy::{copy_via_temp, CopyOptions};
use crate::placement::{check_name, free_name, place, Placement};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use xcopy_config::BackendConfig;
use xcopy_types::{
    Backend, BatchResult, EntityKind, EntryOutcome, Error, FileRequest, Location, MkdirsRequest,
    MvdirsRequest, PolicyPair, Resolved, Result, Stat, UserId,
};

/// Map an I/O error to the engine taxonomy, naming the path involved
pub(crate) fn io_error(path: &Path, error: std::io::Error) -> Error {
    match error.kind() {
        std::io::ErrorKind::NotFound => Error::not_found(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
            path: path.display().to_string(),
        },
        _ => Error::io(format!("{}: {}", path.display(), error)),
    }
}

/// Backend over configured local directories
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    drives: BTreeMap<String, PathBuf>,
    natives: BTreeMap<String, PathBuf>,
    options: CopyOptions,
}

impl LocalBackend {
    /// Create a backend without roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with the roots of a configuration
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            drives: config.drives.clone(),
            natives: config.natives.clone(),
            options: CopyOptions::default(),
        }
    }

    /// Add a drive rooted at `root`
    pub fn with_drive(mut self, id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.drives.insert(id.into(), root.into());
        self
    }

    /// Add a native filesystem rooted at `root`
    pub fn with_native(mut self, id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.natives.insert(id.into(), root.into());
        self
    }

    /// Set file copy options
    pub fn with_copy_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether a drive or native filesystem with this id is configured
    pub fn has_volume(&self, id: &str) -> bool {
        self.drives.contains_key(id) || self.natives.contains_key(id)
    }

    /// Filesystem path of a location
    pub fn resolve(&self, location: &Location) -> Result<PathBuf> {
        let (root, relative) = match location {
            Location::Drive { drive, dir } => (
                self.drives
                    .get(drive)
                    .ok_or_else(|| Error::not_found(format!("drive {}", drive)))?,
                Path::new(dir.as_str()),
            ),
            Location::Native { id, path } => (
                self.natives
                    .get(id)
                    .ok_or_else(|| Error::not_found(format!("native filesystem {}", id)))?,
                path.as_path(),
            ),
        };

        let mut resolved = root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(Error::invalid_request(format!(
                        "{} leaves its root",
                        location
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Stat of an entry named `name` inside the directory at `dir`
    fn stat(dir: &Location, name: &str, kind: EntityKind) -> Stat {
        let stat = Stat {
            name: name.to_string(),
            kind,
            uuid: None,
        };
        match dir {
            Location::Drive { dir, .. } if dir.is_empty() => stat.with_uuid(name),
            Location::Drive { dir, .. } => {
                stat.with_uuid(format!("{}/{}", dir.trim_end_matches('/'), name))
            }
            Location::Native { .. } => stat,
        }
    }

    async fn names_in(dir: &Path) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        let mut entries = fs::read_dir(dir).await.map_err(|e| io_error(dir, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
            if let Ok(name) = entry.file_name().into_string() {
                names.insert(name);
            }
        }
        Ok(names)
    }

    /// Name to create `name` under, after applying `policy` to its occupant
    ///
    /// `Ok(Err(stat))` means the occupant stays and is reported instead.
    async fn settle(
        dir_location: &Location,
        dir: &Path,
        name: &str,
        incoming: EntityKind,
        policy: PolicyPair,
    ) -> Result<std::result::Result<(String, Resolved), EntryOutcome>> {
        check_name(name)?;
        let target = dir.join(name);
        match place(name, incoming, occupant(&target).await?, policy)? {
            Placement::Existing { kind, resolved } => Ok(Err(EntryOutcome::resolved(
                Self::stat(dir_location, name, kind),
                resolved,
            ))),
            Placement::Create { replace, resolved } => {
                if replace {
                    remove_entry(&target).await?;
                }
                Ok(Ok((name.to_string(), resolved)))
            }
            Placement::Rename { resolved } => {
                let taken = Self::names_in(dir).await?;
                Ok(Ok((free_name(name, |c| taken.contains(c)), resolved)))
            }
        }
    }

    async fn mkdir_one(&self, location: &Location, dir: &Path, name: &str, policy: PolicyPair) -> Result<EntryOutcome> {
        let (name, resolved) = match Self::settle(location, dir, name, EntityKind::Directory, policy).await? {
            Ok(target) => target,
            Err(existing) => return Ok(existing),
        };
        let path = dir.join(&name);
        fs::create_dir(&path).await.map_err(|e| io_error(&path, e))?;
        Ok(EntryOutcome::resolved(
            Self::stat(location, &name, EntityKind::Directory),
            resolved,
        ))
    }

    async fn mvdir_one(
        &self,
        request: &MvdirsRequest,
        src: &Path,
        dst: &Path,
        name: &str,
    ) -> Result<EntryOutcome> {
        check_name(name)?;
        let from = src.join(name);
        if occupant(&from).await? != Some(EntityKind::Directory) {
            return Err(Error::not_found(from.display().to_string()));
        }
        let (target, resolved) =
            match Self::settle(&request.dst, dst, name, EntityKind::Directory, request.policy).await? {
                Ok(target) => target,
                Err(existing) => return Ok(existing),
            };
        let to = dst.join(&target);
        fs::rename(&from, &to).await.map_err(|e| io_error(&to, e))?;
        Ok(EntryOutcome::resolved(
            Self::stat(&request.dst, &target, EntityKind::Directory),
            resolved,
        ))
    }

    async fn transfer(&self, request: FileRequest, remove_source: bool) -> Result<EntryOutcome> {
        check_name(&request.name)?;
        let src_dir = self.resolve(&request.src)?;
        let dst_dir = self.resolve(&request.dst)?;
        let from = src_dir.join(&request.name);
        if occupant(&from).await? != Some(EntityKind::File) {
            return Err(Error::not_found(from.display().to_string()));
        }

        let (name, resolved) =
            match Self::settle(&request.dst, &dst_dir, &request.name, EntityKind::File, request.policy).await? {
                Ok(target) => target,
                Err(existing) => return Ok(existing),
            };

        let same_drive = matches!(
            (&request.src, &request.dst),
            (Location::Drive { drive: a, .. }, Location::Drive { drive: b, .. }) if a == b
        );
        if remove_source && same_drive {
            let to = dst_dir.join(&name);
            fs::rename(&from, &to).await.map_err(|e| io_error(&to, e))?;
        } else {
            copy_via_temp(&from, &dst_dir, &name, self.options).await?;
            if remove_source {
                fs::remove_file(&from).await.map_err(|e| io_error(&from, e))?;
            }
        }
        Ok(EntryOutcome::resolved(
            Self::stat(&request.dst, &name, EntityKind::File),
            resolved,
        ))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn readdir(&self, _user: UserId, dir: &Location) -> Result<Vec<Stat>> {
        let path = self.resolve(dir)?;
        let mut entries = fs::read_dir(&path).await.map_err(|e| io_error(&path, e))?;
        let mut stats = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&path, e))? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!("skipping non UTF-8 name in {}", path.display());
                continue;
            };
            let file_type = entry.file_type().await.map_err(|e| io_error(&entry.path(), e))?;
            let kind = if file_type.is_dir() {
                EntityKind::Directory
            } else if file_type.is_file() {
                EntityKind::File
            } else {
                debug!("skipping special entry {}", entry.path().display());
                continue;
            };
            stats.push(Self::stat(dir, &name, kind));
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    async fn mkdirs(&self, _user: UserId, request: MkdirsRequest) -> Result<BatchResult> {
        let dir = self.resolve(&request.dir)?;
        if occupant(&dir).await? != Some(EntityKind::Directory) {
            return Err(Error::not_found(dir.display().to_string()));
        }
        let mut results = BatchResult::new();
        for name in &request.names {
            let outcome = self
                .mkdir_one(&request.dir, &dir, name, request.policy)
                .await
                .unwrap_or_else(EntryOutcome::failed);
            results.insert(name.clone(), outcome);
        }
        Ok(results)
    }

    async fn mvdirs(&self, _user: UserId, request: MvdirsRequest) -> Result<BatchResult> {
        match (&request.src, &request.dst) {
            (Location::Drive { drive: a, .. }, Location::Drive { drive: b, .. }) if a == b => {}
            _ => {
                return Err(Error::not_implemented(format!(
                    "moving directories from {} to {}",
                    request.src, request.dst
                )))
            }
        }
        let src = self.resolve(&request.src)?;
        let dst = self.resolve(&request.dst)?;
        let mut results = BatchResult::new();
        for name in &request.names {
            let outcome = self
                .mvdir_one(&request, &src, &dst, name)
                .await
                .unwrap_or_else(EntryOutcome::failed);
            results.insert(name.clone(), outcome);
        }
        Ok(results)
    }

    async fn copy_file(&self, _user: UserId, request: FileRequest) -> Result<EntryOutcome> {
        self.transfer(request, false).await
    }

    async fn move_file(&self, _user: UserId, request: FileRequest) -> Result<EntryOutcome> {
        if request.src.is_native() || request.dst.is_native() {
            return Err(Error::not_implemented(format!(
                "moving files from {} to {}",
                request.src, request.dst
            )));
        }
        self.transfer(request, true).await
    }

    async fn remove_empty_dir(&self, _user: UserId, dir: &Location) -> Result<bool> {
        let path = self.resolve(dir)?;
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_error(&path, e)),
        };
        if entries
            .next_entry()
            .await
            .map_err(|e| io_error(&path, e))?
            .is_some()
        {
            return Ok(false);
        }
        fs::remove_dir(&path).await.map_err(|e| io_error(&path, e))?;
        Ok(true)
    }

    fn name(&self) -> &str {
        "local"
    }
}

async fn occupant(path: &Path) -> Result<Option<EntityKind>> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(Some(EntityKind::Directory)),
        Ok(_) => Ok(Some(EntityKind::File)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

async fn remove_entry(path: &Path) -> Result<()> {
    match occupant(path).await? {
        Some(EntityKind::Directory) => fs::remove_dir_all(path).await,
        Some(EntityKind::File) => fs::remove_file(path).await,
        None => Ok(()),
    }
    .map_err(|e| io_error(path, e))
}
