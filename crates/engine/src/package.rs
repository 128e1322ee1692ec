//! Package references and the local clone cache.
//!
//! A reference is either an existing local path, used in place, or
//! `[host/]owner/repo[@version]`. Remote packages live in
//! `<cache_root>/<host>/<owner>/<repo>[@<version>]` as working clones: the
//! first use clones the requested branch or tag shallowly, later uses
//! fast-forward the checked out branch from `origin`. Tags stay detached.

use std::fs;
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{ErrorCode, FetchOptions, Repository};
use stencil_util::StencilHome;
use tracing::{debug, info};
use url::Url;

use crate::error::{EngineError, EngineResult};

/// Host assumed for `owner/repo` references.
pub const DEFAULT_HOST: &str = "github.com";

const ORIGIN: &str = "origin";

/// A remote package reference split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    /// `host/owner/repo`, always with a host.
    pub name: String,
    /// Branch or tag to check out.
    pub version: Option<String>,
}

impl PackageReference {
    pub fn parse(reference: &str) -> EngineResult<Self> {
        let trimmed = reference.trim();
        let (name, version) = match trimmed.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (trimmed, None),
        };
        if let Some(version) = version
            && (version.is_empty() || version.contains('@'))
        {
            return Err(EngineError::package(reference, "expected a single '@version' suffix"));
        }

        let segments: Vec<&str> = name.trim_matches('/').split('/').collect();
        if segments.iter().any(|segment| segment.is_empty() || *segment == "." || *segment == "..") {
            return Err(EngineError::package(reference, "expected [host/]owner/repo[@version]"));
        }
        let name = if segments.len() <= 2 {
            format!("{DEFAULT_HOST}/{}", segments.join("/"))
        } else {
            segments.join("/")
        };
        Ok(Self {
            name,
            version: version.map(str::to_string),
        })
    }

    /// Working clone location under `cache_root`.
    pub fn cache_path(&self, cache_root: &Path) -> PathBuf {
        match &self.version {
            Some(version) => cache_root.join(format!("{}@{version}", self.name)),
            None => cache_root.join(&self.name),
        }
    }

    pub fn clone_url(&self) -> String {
        format!("https://{}", self.name)
    }
}

/// Local directory for a package plus the base used to link to its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub dir: PathBuf,
    /// Ends with `/` so relative script paths can be joined onto it.
    pub base_url: String,
    pub local: bool,
}

/// `<home>/packages`.
pub fn default_cache_root() -> PathBuf {
    StencilHome::locate().packages_dir()
}

/// Resolves `reference` to a local directory, cloning or updating the cached
/// copy of a remote package.
pub fn fetch_package(reference: &str, cache_root: &Path) -> EngineResult<ResolvedPackage> {
    let local = Path::new(reference);
    if local.exists() {
        debug!(package = %reference, "using local package");
        return Ok(local_package(local));
    }

    let parsed = PackageReference::parse(reference)?;
    let dir = parsed.cache_path(cache_root);
    debug!(package = %reference, dir = %dir.display(), "using package cache");

    let repo = if dir.exists() {
        info!(package = %reference, "updating cached package");
        let repo = Repository::open(&dir).map_err(|error| EngineError::package(reference, error))?;
        pull(&repo).map_err(|error| EngineError::package(reference, error))?;
        repo
    } else {
        info!(package = %reference, "cloning package");
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|error| EngineError::io(format!("failed to create {}", parent.display()), error))?;
        }
        clone_package(&parsed.clone_url(), &dir, parsed.version.as_deref()).map_err(|error| EngineError::package(reference, error))?
    };

    let base_url = remote_base_url(&repo, parsed.version.as_deref()).map_err(|error| EngineError::package(reference, error))?;
    Ok(ResolvedPackage {
        dir,
        base_url,
        local: false,
    })
}

fn local_package(path: &Path) -> ResolvedPackage {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let base_url = Url::from_directory_path(&absolute)
        .map(String::from)
        .unwrap_or_else(|_| format!("{}/", absolute.display()));
    ResolvedPackage {
        dir: path.to_path_buf(),
        base_url,
        local: true,
    }
}

/// Clones `url` into `dir` at `version`. A version that is not a branch is
/// looked up as a tag and checked out on a detached head.
pub(crate) fn clone_package(url: &str, dir: &Path, version: Option<&str>) -> Result<Repository, git2::Error> {
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options(url));
    let Some(version) = version else {
        return builder.clone(url, dir);
    };
    builder.branch(version);
    match builder.clone(url, dir) {
        Ok(repo) => Ok(repo),
        Err(error) if error.code() == ErrorCode::NotFound => {
            debug!(version = %version, "no branch with that name, trying tags");
            if dir.exists() {
                fs::remove_dir_all(dir).map_err(|error| git2::Error::from_str(&format!("failed to clean {}: {error}", dir.display())))?;
            }
            clone_tag(url, dir, version)
        }
        Err(error) => Err(error),
    }
}

fn clone_tag(url: &str, dir: &Path, tag: &str) -> Result<Repository, git2::Error> {
    let repo = Repository::init(dir)?;
    {
        let mut remote = repo.remote(ORIGIN, url)?;
        let refspec = format!("+refs/tags/{tag}:refs/tags/{tag}");
        remote.fetch(&[refspec.as_str()], Some(&mut fetch_options(url)), None)?;
    }
    let commit = repo.revparse_single(&format!("refs/tags/{tag}^{{commit}}"))?;
    repo.checkout_tree(&commit, Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(commit.id())?;
    drop(commit);
    Ok(repo)
}

fn fetch_options(url: &str) -> FetchOptions<'static> {
    let mut fetch = FetchOptions::new();
    // The local transport has no shallow negotiation.
    if !url.starts_with("file://") {
        fetch.depth(1);
    }
    fetch
}

/// Fetches the checked out branch from `origin` and fast-forwards to it.
/// A detached head is left as is.
fn pull(repo: &Repository) -> Result<(), git2::Error> {
    let Some(branch) = current_branch(repo) else {
        debug!("package clone has a detached head, skipping update");
        return Ok(());
    };
    repo.find_remote(ORIGIN)?.fetch(&[branch.as_str()], None, None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let incoming = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&incoming])?;
    if analysis.is_up_to_date() {
        debug!(branch = %branch, "package is up to date");
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        return Err(git2::Error::from_str("cached clone has diverged from origin"));
    }

    let refname = format!("refs/heads/{branch}");
    repo.find_reference(&refname)?.set_target(incoming.id(), "stencil: fast-forward")?;
    repo.set_head(&refname)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
    debug!(branch = %branch, commit = %incoming.id(), "package fast-forwarded");
    Ok(())
}

fn current_branch(repo: &Repository) -> Option<String> {
    let head = repo.head().ok()?;
    if !head.is_branch() {
        return None;
    }
    head.shorthand().map(str::to_string)
}

/// `<origin>/blob/<branch>/`, naming the requested version when the head is detached.
fn remote_base_url(repo: &Repository, version: Option<&str>) -> Result<String, git2::Error> {
    let remote = repo.find_remote(ORIGIN)?;
    let origin = remote.url().unwrap_or_default().trim_end_matches('/').trim_end_matches(".git");
    let branch = current_branch(repo).or_else(|| version.map(str::to_string)).unwrap_or_else(|| "HEAD".to_string());
    Ok(format!("{origin}/blob/{branch}/"))
}

#[cfg(test)]
mod tests {
    use git2::{RepositoryInitOptions, Signature};

    use super::*;

    fn commit_file(repo: &Repository, name: &str, content: &str) {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = Signature::now("Stencil Tests", "tests@example.com").unwrap();
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, &format!("add {name}"), &tree, &parents)
            .unwrap();
    }

    fn remote_repository(dir: &Path) -> (Repository, String) {
        let mut options = RepositoryInitOptions::new();
        options.initial_head("main");
        let repo = Repository::init_opts(dir, &options).unwrap();
        commit_file(&repo, ".stencil.yaml", "jobs:\n  default:\n    steps: []\n");
        let url = Url::from_directory_path(dir).unwrap().to_string();
        (repo, url.trim_end_matches('/').to_string())
    }

    #[test]
    fn references_gain_a_default_host() {
        assert_eq!(
            PackageReference::parse("acme/app").unwrap(),
            PackageReference {
                name: "github.com/acme/app".into(),
                version: None
            }
        );
        let nested = PackageReference::parse("gitlab.com/group/sub/app@v2").unwrap();
        assert_eq!(nested.name, "gitlab.com/group/sub/app");
        assert_eq!(nested.cache_path(Path::new("/cache")), PathBuf::from("/cache/gitlab.com/group/sub/app@v2"));
        assert_eq!(nested.clone_url(), "https://gitlab.com/group/sub/app");
        assert!(PackageReference::parse("acme/app@").is_err());
        assert!(PackageReference::parse("acme//app").is_err());
    }

    #[test]
    fn local_directories_are_used_in_place() {
        let package = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let cache_root = cache.path().join("packages");
        let reference = package.path().to_string_lossy().into_owned();

        let resolved = fetch_package(&reference, &cache_root).unwrap();
        assert_eq!(resolved.dir, package.path());
        assert!(resolved.local);
        assert!(resolved.base_url.starts_with("file://"));
        assert!(resolved.base_url.ends_with('/'));
        assert!(!cache_root.exists());
    }

    #[test]
    fn clone_checks_out_the_requested_branch() {
        let remote = tempfile::tempdir().unwrap();
        let (_repo, url) = remote_repository(remote.path());
        let target = tempfile::tempdir().unwrap();
        let dir = target.path().join("app");

        let repo = clone_package(&url, &dir, Some("main")).unwrap();
        assert!(dir.join(".stencil.yaml").is_file());
        assert_eq!(current_branch(&repo).as_deref(), Some("main"));
        assert_eq!(remote_base_url(&repo, None).unwrap(), format!("{url}/blob/main/"));
    }

    #[test]
    fn tag_versions_check_out_a_detached_head() {
        let remote = tempfile::tempdir().unwrap();
        let (remote_repo, url) = remote_repository(remote.path());
        let tagged = remote_repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
        remote_repo.tag_lightweight("v1.0", &tagged, false).unwrap();
        commit_file(&remote_repo, "README.md", "after the tag\n");

        let target = tempfile::tempdir().unwrap();
        let dir = target.path().join("app@v1.0");
        let repo = clone_package(&url, &dir, Some("v1.0")).unwrap();

        assert!(dir.join(".stencil.yaml").is_file());
        assert!(!dir.join("README.md").exists());
        assert!(repo.head_detached().unwrap());
        assert_eq!(repo.head().unwrap().target(), Some(tagged.id()));
        assert_eq!(remote_base_url(&repo, Some("v1.0")).unwrap(), format!("{url}/blob/v1.0/"));
        pull(&repo).unwrap();
        assert!(clone_package(&url, &target.path().join("missing"), Some("v9")).is_err());
    }

    #[test]
    fn cached_clones_are_fast_forwarded() {
        let remote = tempfile::tempdir().unwrap();
        let (remote_repo, url) = remote_repository(remote.path());
        let cache = tempfile::tempdir().unwrap();
        let reference = PackageReference::parse("acme/app").unwrap();
        let dir = reference.cache_path(cache.path());
        fs::create_dir_all(dir.parent().unwrap()).unwrap();
        clone_package(&url, &dir, None).unwrap();

        commit_file(&remote_repo, "README.md", "updated upstream\n");
        let resolved = fetch_package("acme/app", cache.path()).unwrap();

        assert_eq!(resolved.dir, dir);
        assert!(!resolved.local);
        assert_eq!(fs::read_to_string(dir.join("README.md")).unwrap(), "updated upstream\n");
        assert_eq!(resolved.base_url, format!("{url}/blob/main/"));
    }
}
