//! Declarative transaction hooks.
//!
//! A hook file pairs one or more `[Trigger]` sections with a single
//! `[Action]`. Triggers match packages or files touched by the current
//! transaction; the action runs an external command before or after the
//! transaction, optionally fed the matched targets on stdin.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook '{name}' line {line}: {reason}")]
    Parse {
        name: String,
        line: usize,
        reason: String,
    },

    #[error("hook '{name}' is incomplete: {reason}")]
    Incomplete { name: String, reason: String },

    #[error("hook '{name}' failed with exit code {code}")]
    Failed { name: String, code: i32 },

    #[error("failed to spawn hook '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Upgrade,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Package,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    PreTransaction,
    PostTransaction,
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub operations: Vec<Operation>,
    pub target_type: TargetType,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Hook {
    /// File name the hook was loaded from; dispatch order key.
    pub name: String,
    pub triggers: Vec<Trigger>,
    pub when: When,
    pub exec: String,
    pub needs_targets: bool,
    pub abort_on_fail: bool,
    pub description: String,
}

/// One package touched by the transaction, as seen by hook matching.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub operation: Operation,
    pub package: String,
    /// Manifest paths with a single leading `/`.
    pub files: Vec<String>,
}

/// Parse one hook file.
pub fn parse_hook(name: &str, input: &str) -> Result<Hook, HookError> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Trigger,
        Action,
    }

    let err = |line: usize, reason: &str| HookError::Parse {
        name: name.to_string(),
        line,
        reason: reason.to_string(),
    };

    let mut triggers: Vec<Trigger> = Vec::new();
    let mut section = Section::None;
    let mut when = None;
    let mut exec = None;
    let mut needs_targets = false;
    let mut abort_on_fail = false;
    let mut description = String::new();

    for (idx, raw) in input.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line {
            "[Trigger]" => {
                triggers.push(Trigger {
                    operations: Vec::new(),
                    target_type: TargetType::Package,
                    targets: Vec::new(),
                });
                section = Section::Trigger;
                continue;
            }
            "[Action]" => {
                section = Section::Action;
                continue;
            }
            _ if line.starts_with('[') => {
                return Err(err(lineno, "unknown section"));
            }
            _ => {}
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| err(lineno, "expected 'Key = Value'"))?;
        let key = key.trim();
        let value = value.trim();

        match section {
            Section::None => return Err(err(lineno, "key outside of a section")),
            Section::Trigger => {
                let trigger = triggers.last_mut().expect("trigger section is open");
                match key {
                    "Operation" => trigger.operations.push(match value {
                        "Install" => Operation::Install,
                        "Upgrade" => Operation::Upgrade,
                        "Remove" => Operation::Remove,
                        _ => return Err(err(lineno, "Operation must be Install|Upgrade|Remove")),
                    }),
                    "Type" => {
                        trigger.target_type = match value {
                            "Package" => TargetType::Package,
                            // `Path` is the legacy spelling
                            "File" | "Path" => TargetType::File,
                            _ => return Err(err(lineno, "Type must be Package|File")),
                        }
                    }
                    "Target" => trigger.targets.push(value.to_string()),
                    _ => return Err(err(lineno, "unknown trigger key")),
                }
            }
            Section::Action => match key {
                "When" => {
                    when = Some(match value {
                        "PreTransaction" => When::PreTransaction,
                        "PostTransaction" => When::PostTransaction,
                        _ => {
                            return Err(err(lineno, "When must be PreTransaction|PostTransaction"))
                        }
                    })
                }
                "Exec" => exec = Some(value.to_string()),
                "NeedsTargets" => needs_targets = parse_bool(value),
                "AbortOnFail" => abort_on_fail = parse_bool(value),
                "Description" => description = value.to_string(),
                // tool dependencies of the hook command; not enforced here
                "Depends" => {}
                _ => return Err(err(lineno, "unknown action key")),
            },
        }
    }

    let incomplete = |reason: &str| HookError::Incomplete {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if triggers.is_empty() {
        return Err(incomplete("no [Trigger] section"));
    }
    for trigger in &triggers {
        if trigger.operations.is_empty() {
            return Err(incomplete("trigger without Operation"));
        }
        if trigger.targets.is_empty() {
            return Err(incomplete("trigger without Target"));
        }
    }

    Ok(Hook {
        name: name.to_string(),
        triggers,
        when: when.ok_or_else(|| incomplete("action without When"))?,
        exec: exec.ok_or_else(|| incomplete("action without Exec"))?,
        needs_targets,
        abort_on_fail,
        description,
    })
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Load hooks from the system and user directories. A user hook shadows a
/// system hook of the same file name; the result is sorted by file name,
/// which is the dispatch order.
pub fn load_hooks(system_dir: &Path, user_dir: &Path) -> Vec<Hook> {
    let mut by_name: BTreeMap<String, Hook> = BTreeMap::new();

    for dir in [system_dir, user_dir] {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("hook") {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(hook = file_name, error = %e, "unreadable hook file, skipping");
                    continue;
                }
            };
            match parse_hook(file_name, &content) {
                Ok(hook) => {
                    by_name.insert(file_name.to_string(), hook);
                }
                Err(e) => {
                    tracing::warn!(hook = file_name, error = %e, "invalid hook file, skipping");
                }
            }
        }
    }

    by_name.into_values().collect()
}

/// Targets of `hook` matched by the transaction, in event order. Empty means
/// the hook does not fire.
pub fn matched_targets(hook: &Hook, events: &[HookEvent]) -> Vec<String> {
    let mut matched = Vec::new();

    for trigger in &hook.triggers {
        for event in events {
            if !trigger.operations.contains(&event.operation) {
                continue;
            }
            match trigger.target_type {
                TargetType::Package => {
                    if trigger.targets.iter().any(|t| t == &event.package)
                        && !matched.contains(&event.package)
                    {
                        matched.push(event.package.clone());
                    }
                }
                TargetType::File => {
                    for pattern in &trigger.targets {
                        let Some(re) = glob_regex(pattern) else {
                            continue;
                        };
                        for file in &event.files {
                            let relative = file.trim_start_matches('/');
                            if re.is_match(relative) && !matched.contains(file) {
                                matched.push(file.clone());
                            }
                        }
                    }
                }
            }
        }
    }

    matched
}

/// Translate a hook glob into an anchored regex: every regex metacharacter
/// is escaped, then `*` becomes `.*` and `?` becomes `.`.
fn glob_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

/// Dispatch every hook whose `When` and triggers match, in ascending
/// file-name order. A failing hook aborts iff it declared `AbortOnFail`;
/// otherwise the failure is logged and dispatch continues.
pub fn run_hooks(
    hooks: &[Hook],
    when: When,
    events: &[HookEvent],
    root: &Path,
) -> Result<(), HookError> {
    for hook in hooks.iter().filter(|h| h.when == when) {
        let targets = matched_targets(hook, events);
        if targets.is_empty() {
            continue;
        }

        if !hook.description.is_empty() {
            tracing::info!(hook = %hook.name, "{}", hook.description);
        }

        match run_one(hook, &targets, root) {
            Ok(()) => {}
            Err(e) if hook.abort_on_fail => return Err(e),
            Err(e) => {
                tracing::warn!(hook = %hook.name, error = %e, "hook failed (ignored)");
            }
        }
    }
    Ok(())
}

fn run_one(hook: &Hook, targets: &[String], root: &Path) -> Result<(), HookError> {
    let spawn_err = |source| HookError::Spawn {
        name: hook.name.clone(),
        source,
    };

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(&hook.exec).current_dir(root);
    cmd.stdin(if hook.needs_targets {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().map_err(spawn_err)?;

    if hook.needs_targets {
        let mut stdin = child.stdin.take().expect("stdin was piped");
        let mut payload = targets.join("\n");
        payload.push('\n');
        stdin.write_all(payload.as_bytes()).map_err(spawn_err)?;
        // closing stdin lets the hook see EOF
    }

    let status = child.wait().map_err(spawn_err)?;
    if status.success() {
        Ok(())
    } else {
        Err(HookError::Failed {
            name: hook.name.clone(),
            code: status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIME_HOOK: &str = "\
[Trigger]
Operation = Install
Operation = Upgrade
Type = File
Target = usr/share/mime/*

[Action]
Description = Updating the MIME type database
When = PostTransaction
Exec = update-mime-database usr/share/mime
NeedsTargets = true
";

    fn event(op: Operation, package: &str, files: &[&str]) -> HookEvent {
        HookEvent {
            operation: op,
            package: package.into(),
            files: files.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_hook() {
        let hook = parse_hook("update-mime.hook", MIME_HOOK).unwrap();
        assert_eq!(hook.triggers.len(), 1);
        assert_eq!(
            hook.triggers[0].operations,
            vec![Operation::Install, Operation::Upgrade]
        );
        assert_eq!(hook.triggers[0].target_type, TargetType::File);
        assert_eq!(hook.when, When::PostTransaction);
        assert!(hook.needs_targets);
        assert!(!hook.abort_on_fail);
    }

    #[test]
    fn test_parse_hook_multiple_triggers() {
        let input = "\
[Trigger]
Operation = Install
Type = Package
Target = linux

[Trigger]
Operation = Remove
Type = Package
Target = linux-lts

[Action]
When = PostTransaction
Exec = /usr/bin/true
";
        let hook = parse_hook("kernels.hook", input).unwrap();
        assert_eq!(hook.triggers.len(), 2);
    }

    #[test]
    fn test_parse_hook_rejects_incomplete() {
        assert!(parse_hook("x.hook", "[Action]\nWhen = PostTransaction\nExec = /bin/true\n").is_err());
        assert!(parse_hook(
            "x.hook",
            "[Trigger]\nOperation = Install\nType = Package\nTarget = a\n[Action]\nExec = /bin/true\n"
        )
        .is_err());
    }

    #[test]
    fn test_parse_hook_rejects_junk() {
        assert!(parse_hook("x.hook", "Operation = Install\n").is_err());
        assert!(parse_hook("x.hook", "[Nope]\n").is_err());
    }

    #[test]
    fn test_file_trigger_glob_match() {
        let hook = parse_hook("update-mime.hook", MIME_HOOK).unwrap();
        let events = [event(
            Operation::Install,
            "shared-mime-info-extras",
            &["/usr/share/mime/packages/foo.xml", "/usr/bin/foo"],
        )];

        let targets = matched_targets(&hook, &events);
        assert_eq!(targets, vec!["/usr/share/mime/packages/foo.xml"]);
    }

    #[test]
    fn test_file_trigger_operation_filter() {
        let hook = parse_hook("update-mime.hook", MIME_HOOK).unwrap();
        let events = [event(
            Operation::Remove,
            "foo",
            &["/usr/share/mime/packages/foo.xml"],
        )];
        assert!(matched_targets(&hook, &events).is_empty());
    }

    #[test]
    fn test_package_trigger_exact_name() {
        let input = "\
[Trigger]
Operation = Upgrade
Type = Package
Target = linux

[Action]
When = PostTransaction
Exec = mkinitcpio -P
";
        let hook = parse_hook("initrd.hook", input).unwrap();

        let hit = [event(Operation::Upgrade, "linux", &[])];
        assert_eq!(matched_targets(&hook, &hit), vec!["linux"]);

        let miss = [event(Operation::Upgrade, "linux-lts", &[])];
        assert!(matched_targets(&hook, &miss).is_empty());
    }

    #[test]
    fn test_glob_question_mark() {
        let re = glob_regex("usr/lib/modules/?.?/*").unwrap();
        assert!(re.is_match("usr/lib/modules/6.9/kernel"));
        assert!(!re.is_match("usr/lib/modules/6.10/kernel"));
    }

    #[test]
    fn test_glob_escapes_regex_meta() {
        let re = glob_regex("usr/share/app+extras/file.txt").unwrap();
        assert!(re.is_match("usr/share/app+extras/file.txt"));
        assert!(!re.is_match("usr/share/appppextras/fileXtxt"));
    }

    #[test]
    fn test_load_hooks_user_overrides_system() {
        let tmp = tempfile::tempdir().unwrap();
        let system = tmp.path().join("system");
        let user = tmp.path().join("user");
        std::fs::create_dir_all(&system).unwrap();
        std::fs::create_dir_all(&user).unwrap();

        std::fs::write(system.join("a.hook"), MIME_HOOK).unwrap();
        let user_hook = MIME_HOOK.replace("PostTransaction", "PreTransaction");
        std::fs::write(user.join("a.hook"), user_hook).unwrap();
        std::fs::write(system.join("b.hook"), MIME_HOOK).unwrap();

        let hooks = load_hooks(&system, &user);
        assert_eq!(hooks.len(), 2);
        // sorted by file name, user copy of a.hook wins
        assert_eq!(hooks[0].name, "a.hook");
        assert_eq!(hooks[0].when, When::PreTransaction);
        assert_eq!(hooks[1].name, "b.hook");
    }

    #[test]
    fn test_run_hooks_pipes_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("targets.txt");
        let input = format!(
            "[Trigger]\nOperation = Install\nType = File\nTarget = usr/share/mime/*\n\n\
             [Action]\nWhen = PostTransaction\nExec = cat > {}\nNeedsTargets = true\n",
            out.display()
        );
        let hook = parse_hook("capture.hook", &input).unwrap();
        let events = [event(
            Operation::Install,
            "foo",
            &["/usr/share/mime/packages/foo.xml"],
        )];

        run_hooks(&[hook], When::PostTransaction, &events, tmp.path()).unwrap();

        let captured = std::fs::read_to_string(&out).unwrap();
        assert_eq!(captured, "/usr/share/mime/packages/foo.xml\n");
    }

    #[test]
    fn test_run_hooks_abort_on_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let input = "\
[Trigger]
Operation = Install
Type = Package
Target = foo

[Action]
When = PreTransaction
Exec = exit 3
AbortOnFail = true
";
        let hook = parse_hook("strict.hook", input).unwrap();
        let events = [event(Operation::Install, "foo", &[])];

        let err = run_hooks(&[hook], When::PreTransaction, &events, tmp.path()).unwrap_err();
        assert!(matches!(err, HookError::Failed { code: 3, .. }));
    }

    #[test]
    fn test_run_hooks_ignores_failure_without_abort() {
        let tmp = tempfile::tempdir().unwrap();
        let input = "\
[Trigger]
Operation = Install
Type = Package
Target = foo

[Action]
When = PreTransaction
Exec = exit 1
";
        let hook = parse_hook("lenient.hook", input).unwrap();
        let events = [event(Operation::Install, "foo", &[])];

        assert!(run_hooks(&[hook], When::PreTransaction, &events, tmp.path()).is_ok());
    }
}
