//! Writing generated files, or checking them against what is already on disk.

use log::warn;
use std::{
    fs,
    io::{self, Write},
    path::Path,
    process::{Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

/// What to do with a generated file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Always write the file.
    Generate,
    /// Only write the file when its content changed.
    Incremental,
    /// Write nothing, compare with the file on disk.
    Verify,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Written,
    Unchanged,
    /// The file on disk differs from the generated text. Holds a line diff, or a note when there
    /// is no file to compare with.
    Mismatch(String),
}

/// Prepends the header every generated file carries.
pub fn with_header(source: &str, content: &str) -> String {
    format!(
        "// This file is auto-generated by autogen from {source}.\n\
        // It should not be edited manually. Changes should be made by editing autogen.\n\
        \n\
        {content}",
    )
}

pub fn write(path: &Path, content: &str, mode: Mode) -> io::Result<Outcome> {
    let existing = match fs::read_to_string(path) {
        Ok(existing) => Some(existing),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err),
    };

    match mode {
        Mode::Verify => Ok(match existing {
            Some(existing) if existing == content => Outcome::Unchanged,
            Some(existing) => Outcome::Mismatch(line_diff(&existing, content)),
            None => Outcome::Mismatch(format!("{} does not exist\n", path.display())),
        }),
        Mode::Incremental if existing.as_deref() == Some(content) => Ok(Outcome::Unchanged),
        Mode::Generate | Mode::Incremental => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;

            Ok(Outcome::Written)
        }
    }
}

/// A diff of the lines that differ between `old` and `new`, after trimming the common prefix and
/// suffix. Removed lines start with `-`, added lines with `+`.
pub fn line_diff(old: &str, new: &str) -> String {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();

    let prefix = old
        .iter()
        .zip(&new)
        .take_while(|(old, new)| old == new)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(old, new)| old == new)
        .count();

    let removed = &old[prefix..old.len() - suffix];
    let added = &new[prefix..new.len() - suffix];
    let mut diff = format!(
        "@@ -{},{} +{},{} @@\n",
        prefix + 1,
        removed.len(),
        prefix + 1,
        added.len(),
    );

    for line in removed {
        diff.push_str(&format!("-{line}\n"));
    }

    for line in added {
        diff.push_str(&format!("+{line}\n"));
    }

    diff
}

static FORMATTER_MISSING: AtomicBool = AtomicBool::new(false);

/// Runs `clang-format` over `content`, as if it were the contents of `file_name`.
///
/// When the formatter can't be run, or rejects the input, the text is returned unchanged.
pub fn clang_format(file_name: &str, content: String) -> String {
    if FORMATTER_MISSING.load(Ordering::Relaxed) {
        return content;
    }

    let child = Command::new("clang-format")
        .arg(format!("--assume-filename={file_name}"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(err) => {
            if !FORMATTER_MISSING.swap(true, Ordering::Relaxed) {
                warn!("failed to run clang-format, output will not be formatted: {err}");
            }

            return content;
        }
    };

    let output = thread::scope(|scope| {
        if let Some(mut stdin) = child.stdin.take() {
            let content = content.as_bytes();
            scope.spawn(move || stdin.write_all(content));
        }

        child.wait_with_output()
    });

    match output {
        Ok(output) if output.status.success() => match String::from_utf8(output.stdout) {
            Ok(formatted) => formatted,
            Err(_) => {
                warn!("clang-format produced invalid UTF-8 for {file_name}");
                content
            }
        },
        Ok(output) => {
            warn!(
                "clang-format failed on {file_name}: {}",
                String::from_utf8_lossy(&output.stderr).trim(),
            );
            content
        }
        Err(err) => {
            warn!("clang-format failed on {file_name}: {err}");
            content
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, process};

    fn temp_file(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("autogen-test-{}-{}", process::id(), name))
    }

    #[test]
    fn diff_of_changed_lines() {
        assert_eq!(
            line_diff("a\nb\nc\nd\n", "a\nx\ny\nd\n"),
            "@@ -2,2 +2,2 @@\n-b\n-c\n+x\n+y\n",
        );
        assert_eq!(line_diff("a\n", "a\nb\n"), "@@ -2,0 +2,1 @@\n+b\n");
    }

    #[test]
    fn incremental_skips_identical_content() {
        let path = temp_file("incremental.h");

        assert_eq!(write(&path, "int x;\n", Mode::Generate).unwrap(), Outcome::Written);
        assert_eq!(
            write(&path, "int x;\n", Mode::Incremental).unwrap(),
            Outcome::Unchanged,
        );
        assert_eq!(
            write(&path, "int y;\n", Mode::Incremental).unwrap(),
            Outcome::Written,
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "int y;\n");

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn verify_never_writes() {
        let path = temp_file("verify.h");

        assert!(matches!(
            write(&path, "int x;\n", Mode::Verify).unwrap(),
            Outcome::Mismatch(_),
        ));
        assert!(!path.exists());

        fs::write(&path, "int x;\n").unwrap();
        assert_eq!(write(&path, "int x;\n", Mode::Verify).unwrap(), Outcome::Unchanged);
        assert_eq!(
            write(&path, "int y;\n", Mode::Verify).unwrap(),
            Outcome::Mismatch("@@ -1,1 +1,1 @@\n-int x;\n+int y;\n".to_owned()),
        );

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn header_names_the_source() {
        let text = with_header("vk.xml", "int x;\n");
        assert!(text.starts_with("// This file is auto-generated by autogen from vk.xml.\n"));
        assert!(text.ends_with("\nint x;\n"));
    }
}
