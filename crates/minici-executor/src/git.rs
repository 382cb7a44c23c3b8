//! Git command lines and output parsing.

use minici_core::CommitInfo;

/// Prints the checked-out branch, then hash, author and subject of HEAD,
/// one per line.
pub const HEAD_QUERY: &str = "git rev-parse --abbrev-ref HEAD && git log -1 --format=%H%n%an%n%s";

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shallow single-branch clone of `url` into the current directory.
///
/// `--` ends option parsing so a URL starting with `-` stays a URL.
pub fn clone_command(url: &str, branch: &str) -> String {
    format!(
        "git clone --depth 1 --single-branch --branch {} -- {} .",
        shell_quote(branch),
        shell_quote(url)
    )
}

/// Parse the output of [`HEAD_QUERY`] into the checked-out branch and commit.
pub fn parse_head(output: &str) -> Option<(String, CommitInfo)> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let branch = lines.next()?.to_string();
    let hash = lines.next()?.to_string();
    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let author_name = lines.next().unwrap_or("unknown").to_string();
    let message = lines.next().unwrap_or_default().to_string();
    Some((
        branch,
        CommitInfo {
            hash,
            message,
            author_name,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_command_quotes_arguments() {
        assert_eq!(
            clone_command("https://example.com/org/repo.git", "feature/x"),
            "git clone --depth 1 --single-branch --branch 'feature/x' -- 'https://example.com/org/repo.git' ."
        );
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_clone_command_keeps_dash_url_positional() {
        let command = clone_command("--upload-pack=touch /tmp/pwned", "main");
        assert!(command.ends_with("-- '--upload-pack=touch /tmp/pwned' ."));
    }

    #[test]
    fn test_parse_head() {
        let output = "main\n0123456789abcdef0123456789abcdef01234567\nSam Doe\nFix the build\n";
        let (branch, commit) = parse_head(output).unwrap();
        assert_eq!(branch, "main");
        assert_eq!(commit.hash, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(commit.author_name, "Sam Doe");
        assert_eq!(commit.message, "Fix the build");
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        assert!(parse_head("").is_none());
        assert!(parse_head("main\nfatal: not a git repository\n").is_none());
    }
}
