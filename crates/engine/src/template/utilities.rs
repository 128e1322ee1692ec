//! Function namespaces callable from templates: `utils`, `git`, `params`
//! and `path`, plus the global `range`.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use rand::Rng;
use serde_json::{Map, Value};
use stencil_util::{GitUrl, absolutize, block_on_future, expand_tilde, parse_structured};
use tracing::debug;

use super::eval::CallArgs;
use super::parameter_store::active_store;
use super::{RenderError, UtilityError};
use crate::values::to_text;

const NAMESPACES: [&str; 4] = ["utils", "git", "params", "path"];
const RANDOM_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const DEFAULT_REMOTE: &str = "origin";

pub(crate) fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

pub(crate) fn call(namespace: &str, function: &str, args: &CallArgs) -> Result<Value, RenderError> {
    match namespace {
        "utils" => call_utils(function, args),
        "git" => call_git(function, args),
        "params" => call_params(function, args),
        "path" => call_path(function, args),
        other => Err(RenderError::UnknownFunction(format!("{other}.{function}"))),
    }
}

pub(crate) fn call_global(function: &str, args: &CallArgs) -> Result<Value, RenderError> {
    match function {
        "range" => range(args),
        other => Err(RenderError::UnknownFunction(other.to_string())),
    }
}

fn call_utils(function: &str, args: &CallArgs) -> Result<Value, RenderError> {
    match function {
        "read_file" => read_file(&args.text(0, "path")?, args.flag(1, "parse")),
        "read_json" | "read_yaml" => read_file(&args.text(0, "path")?, true),
        "random_string" => Ok(Value::String(random_string(
            usize::try_from(args.integer_or(0, "length", 16)?).unwrap_or_default(),
            &args.text_or(1, "special_chars", ""),
        ))),
        "checksum" => checksum(&expand_tilde(&args.text(0, "path")?)).map(Value::String),
        "download_file" => download_file(&args.text(0, "url")?, args.get(1, "checksum").filter(|v| !v.is_null()).map(to_text)),
        "path_exists" => Ok(Value::Bool(expand_tilde(&args.text(0, "path")?).exists())),
        "join_arrays" => Ok(Value::Array(
            args.positional
                .iter()
                .flat_map(|sequence| match sequence {
                    Value::Array(items) => items.clone(),
                    Value::Null => Vec::new(),
                    other => vec![other.clone()],
                })
                .collect(),
        )),
        "dirs" => list_entries(&args.text_or(0, "path", "."), true),
        "files" => list_entries(&args.text_or(0, "path", "."), false),
        "glob" => glob_paths(&args.text(0, "pattern")?),
        other => Err(RenderError::UnknownFunction(format!("utils.{other}"))),
    }
}

fn read_file(path: &str, parse: bool) -> Result<Value, RenderError> {
    let path = expand_tilde(path);
    let content = fs::read_to_string(&path).map_err(|source| UtilityError::Io { path: path.clone(), source })?;
    if !parse {
        return Ok(Value::String(content));
    }
    Ok(parse_structured(&content, &path).map_err(UtilityError::from)?)
}

fn random_string(length: usize, special_chars: &str) -> String {
    let alphabet: Vec<char> = RANDOM_ALPHABET.chars().chain(special_chars.chars()).collect();
    let mut rng = rand::thread_rng();
    (0..length).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect()
}

fn checksum(path: &Path) -> Result<String, RenderError> {
    let bytes = fs::read(path).map_err(|source| UtilityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hex::encode(Md5::digest(&bytes)))
}

/// Downloads into a temporary file that outlives the run and returns its path.
fn download_file(url: &str, expected: Option<String>) -> Result<Value, RenderError> {
    let download_error = |message: String| UtilityError::Download {
        url: url.to_string(),
        message,
    };
    let request_url = url.to_string();
    let bytes = block_on_future(async move {
        let response = reqwest::get(&request_url).await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status}");
        }
        Ok(response.bytes().await?.to_vec())
    })
    .map_err(|error| download_error(format!("{error:#}")))?;

    let mut file = tempfile::NamedTempFile::new().map_err(|error| download_error(error.to_string()))?;
    file.write_all(&bytes).map_err(|error| download_error(error.to_string()))?;
    let (_, path) = file.keep().map_err(|error| download_error(error.to_string()))?;

    if let Some(expected) = expected {
        let actual = checksum(&path)?;
        if !actual.eq_ignore_ascii_case(&expected) {
            let _ = fs::remove_file(&path);
            return Err(UtilityError::ChecksumMismatch {
                url: url.to_string(),
                expected,
                actual,
            }
            .into());
        }
    }
    debug!(url, path = %path.display(), "downloaded file");
    Ok(Value::String(path.to_string_lossy().into_owned()))
}

fn list_entries(path: &str, directories: bool) -> Result<Value, RenderError> {
    let root = expand_tilde(path);
    let entries = fs::read_dir(&root).map_err(|source| UtilityError::Io { path: root.clone(), source })?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir() == directories))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(Value::Array(names.into_iter().map(Value::String).collect()))
}

fn glob_paths(pattern: &str) -> Result<Value, RenderError> {
    let expanded = expand_tilde(pattern);
    let paths = glob::glob(&expanded.to_string_lossy()).map_err(|error| RenderError::evaluation(format!("invalid glob '{pattern}': {error}")))?;
    Ok(Value::Array(
        paths
            .filter_map(Result::ok)
            .map(|path| Value::String(path.to_string_lossy().into_owned()))
            .collect(),
    ))
}

fn call_git(function: &str, args: &CallArgs) -> Result<Value, RenderError> {
    let path = args.text_or(0, "path", ".");
    let remote = args.text_or(1, "remote", DEFAULT_REMOTE);
    match function {
        "remote_info" => Ok(remote_url(&path, &remote).map(|url| url.to_value()).unwrap_or_else(|| Value::Object(Map::new()))),
        "owner_repo" => Ok(Value::String(remote_url(&path, &remote).map(|url| url.owner_repo()).unwrap_or_default())),
        other => Err(RenderError::UnknownFunction(format!("git.{other}"))),
    }
}

fn remote_url(path: &str, remote: &str) -> Option<GitUrl> {
    let lookup = || -> anyhow::Result<GitUrl> {
        let repository = git2::Repository::discover(expand_tilde(path))?;
        let remote = repository.find_remote(remote)?;
        let url = remote.url().ok_or_else(|| anyhow::anyhow!("remote url is not valid UTF-8"))?;
        Ok(GitUrl::parse(url)?)
    };
    lookup().inspect_err(|error| debug!(path, remote, error = %error, "git remote lookup failed")).ok()
}

fn call_params(function: &str, args: &CallArgs) -> Result<Value, RenderError> {
    match function {
        "get" => {
            let name = args.text(0, "name")?;
            Ok(Value::String(active_store().get(&name).unwrap_or_else(|error| {
                debug!(parameter = %name, error = %error, "parameter lookup failed");
                String::new()
            })))
        }
        other => Err(RenderError::UnknownFunction(format!("params.{other}"))),
    }
}

fn call_path(function: &str, args: &CallArgs) -> Result<Value, RenderError> {
    let text = |value: PathBuf| Value::String(value.to_string_lossy().into_owned());
    let component = |part: Option<&std::ffi::OsStr>| Value::String(part.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default());
    match function {
        "join" => Ok(text(args.positional.iter().map(to_text).fold(PathBuf::new(), |joined, part| joined.join(part)))),
        "basename" => Ok(component(Path::new(&args.text(0, "path")?).file_name())),
        "dirname" => Ok(text(Path::new(&args.text(0, "path")?).parent().map(Path::to_path_buf).unwrap_or_default())),
        "stem" => Ok(component(Path::new(&args.text(0, "path")?).file_stem())),
        "extension" => Ok(component(Path::new(&args.text(0, "path")?).extension())),
        "exists" => Ok(Value::Bool(expand_tilde(&args.text(0, "path")?).exists())),
        "abspath" => Ok(text(absolutize(&expand_tilde(&args.text(0, "path")?)))),
        "expanduser" => Ok(text(expand_tilde(&args.text(0, "path")?))),
        other => Err(RenderError::UnknownFunction(format!("path.{other}"))),
    }
}

fn range(args: &CallArgs) -> Result<Value, RenderError> {
    let (start, stop) = match args.positional.len() {
        0 => return Err(RenderError::evaluation("range expects at least one argument")),
        1 => (0, args.integer_or(0, "stop", 0)?),
        _ => (args.integer_or(0, "start", 0)?, args.integer_or(1, "stop", 0)?),
    };
    let step = args.integer_or(2, "step", 1)?;
    if step == 0 {
        return Err(RenderError::evaluation("range step must not be zero"));
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        values.push(Value::from(current));
        current += step;
    }
    Ok(Value::Array(values))
}
