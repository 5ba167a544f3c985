//! Stage graph walk for a single build target.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use dockersource_core::error::{Result, WrapperError};

use super::dockerfile::{ArgDecl, Dockerfile, Stage};
use super::{BuildTarget, Frontend};
use crate::oci::ImageReference;
use crate::resolver::ImageMetaResolver;

/// Base name meaning "no base image".
const SCRATCH: &str = "scratch";

/// Frontend for the Dockerfile syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerfileFrontend;

#[async_trait]
impl Frontend for DockerfileFrontend {
    fn list_targets(&self, description: &[u8]) -> Result<Vec<BuildTarget>> {
        let dockerfile = Dockerfile::from_bytes(description)?;
        Ok(dockerfile
            .stages
            .into_iter()
            .map(|stage| BuildTarget {
                name: stage.name.unwrap_or_default(),
                base: stage.base,
            })
            .collect())
    }

    async fn evaluate(
        &self,
        description: &[u8],
        target: &str,
        build_args: &HashMap<String, String>,
        resolver: &dyn ImageMetaResolver,
    ) -> Result<()> {
        let dockerfile = Dockerfile::from_bytes(description)?;
        let globals = resolve_args(&dockerfile.global_args, build_args, &HashMap::new());
        let images = outline(&dockerfile, target, &globals, build_args)?;

        for image in images {
            resolver.resolve_image_config(&image).await?;
        }
        Ok(())
    }
}

/// Canonical base images needed to build `target`, in discovery order.
fn outline(
    dockerfile: &Dockerfile,
    target: &str,
    globals: &HashMap<String, String>,
    build_args: &HashMap<String, String>,
) -> Result<Vec<String>> {
    let stages = &dockerfile.stages;
    let target_idx = if target.is_empty() {
        stages.len() - 1
    } else {
        stages
            .iter()
            .position(|s| s.has_name(target))
            .ok_or_else(|| {
                WrapperError::FrontendError(format!(
                    "target stage {:?} could not be found",
                    target
                ))
            })?
    };

    let mut images = Vec::new();
    let mut seen_images = BTreeSet::new();
    let mut visited = vec![false; stages.len()];
    let mut pending = vec![target_idx];

    while let Some(idx) = pending.pop() {
        if std::mem::replace(&mut visited[idx], true) {
            continue;
        }
        let stage = &stages[idx];

        let base = expand_args(&stage.base, globals);
        let mut sources = vec![base];
        if !stage.dependencies.is_empty() {
            let scope = resolve_args(&stage.args, build_args, globals);
            sources.extend(stage.dependencies.iter().map(|d| expand_args(d, &scope)));
        }

        for (n, source) in sources.into_iter().enumerate() {
            let is_base = n == 0;
            if let Some(dep) = stage_ref(stages, idx, &source, !is_base) {
                pending.push(dep);
                continue;
            }
            if is_base && source.eq_ignore_ascii_case(SCRATCH) {
                continue;
            }

            let canonical = ImageReference::canonicalize(&source).map_err(|e| {
                WrapperError::FrontendError(format!(
                    "stage {}: base name {:?} ({}) is not a valid image: {}",
                    idx, stage.base, source, e
                ))
            })?;
            tracing::debug!(stage = idx, image = %canonical, "Stage depends on image");
            if seen_images.insert(canonical.clone()) {
                images.push(canonical);
            }
        }
    }

    Ok(images)
}

/// Index of an earlier stage that `name` refers to.
///
/// `FROM` only refers to stages by name; `--from` also accepts an index.
fn stage_ref(stages: &[Stage], current: usize, name: &str, allow_index: bool) -> Option<usize> {
    if allow_index {
        if let Ok(i) = name.parse::<usize>() {
            return (i < current).then_some(i);
        }
    }
    stages[..current].iter().position(|s| s.has_name(name))
}

/// Values of declared args: build-time value, else expanded default.
fn resolve_args(
    decls: &[ArgDecl],
    build_args: &HashMap<String, String>,
    inherited: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut scope = inherited.clone();
    for decl in decls {
        let value = match build_args.get(&decl.name) {
            Some(v) => Some(v.clone()),
            None => decl
                .default
                .as_deref()
                .map(|d| expand_args(d, &scope))
                .or_else(|| inherited.get(&decl.name).cloned()),
        };
        if let Some(value) = value {
            scope.insert(decl.name.clone(), value);
        }
    }
    scope
}

/// Substitute `$VAR`, `${VAR}`, `${VAR:-default}` and `${VAR:+alt}`.
///
/// Unset variables expand to the empty string; `\$` is a literal `$`.
fn expand_args(s: &str, args: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'$') => {
                out.push('$');
                chars.next();
            }
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    out.push_str("${");
                    out.push_str(&inner);
                    continue;
                }
                out.push_str(&expand_braced(&inner, args));
            }
            '$' if chars
                .peek()
                .map_or(false, |c| c.is_ascii_alphanumeric() || *c == '_') =>
            {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if let Some(value) = args.get(&name) {
                    out.push_str(value);
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn expand_braced(inner: &str, args: &HashMap<String, String>) -> String {
    let value = |name: &str| args.get(name).filter(|v| !v.is_empty());

    if let Some((name, default)) = inner.split_once(":-") {
        return match value(name) {
            Some(v) => v.clone(),
            None => expand_args(default, args),
        };
    }
    if let Some((name, alt)) = inner.split_once(":+") {
        return match value(name) {
            Some(_) => expand_args(alt, args),
            None => String::new(),
        };
    }
    args.get(inner).cloned().unwrap_or_default()
}
