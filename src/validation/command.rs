//! Deny-list scan for job commands.
//!
//! The scan is deliberately not a shell parser: every pattern is matched
//! against the raw text, so quoting or escaping never hides a match.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Maximum command length, in characters.
pub const MAX_COMMAND_LEN: usize = 2000;

/// Why a command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockedCategory {
    /// `<script>` tags or `javascript:` URLs.
    Markup,
    /// Removing, moving or copying the filesystem root or top-level system paths.
    RootPath,
    /// World-writable or setuid permission changes, ownership changes on system paths.
    Permissions,
    /// sudo, su, doas and friends, plus account management.
    PrivilegeEscalation,
    /// Fetching a payload and running it.
    DownloadExecute,
    /// Shells bound to network sockets.
    ReverseShell,
    /// Interpreters evaluating inline code.
    CodeEvaluation,
    /// Output redirected into system directories or raw devices.
    SystemRedirect,
    /// Output piped or chained into a shell interpreter.
    ChainedShell,
    /// Disk formatting, raw writes, power state changes, fork bombs.
    Destructive,
    /// Stopping services or removing containers.
    ServiceLifecycle,
}

impl BlockedCategory {
    /// Human readable category name.
    pub fn label(&self) -> &'static str {
        match self {
            BlockedCategory::Markup => "script markup",
            BlockedCategory::RootPath => "root path removal",
            BlockedCategory::Permissions => "dangerous permission change",
            BlockedCategory::PrivilegeEscalation => "privilege escalation",
            BlockedCategory::DownloadExecute => "download and execute",
            BlockedCategory::ReverseShell => "reverse shell",
            BlockedCategory::CodeEvaluation => "code evaluation",
            BlockedCategory::SystemRedirect => "redirection into system directory",
            BlockedCategory::ChainedShell => "chained shell execution",
            BlockedCategory::Destructive => "destructive system operation",
            BlockedCategory::ServiceLifecycle => "service or container lifecycle",
        }
    }
}

impl fmt::Display for BlockedCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const SYSTEM_DIRS: &str = r"(etc|bin|sbin|usr|boot|lib|lib32|lib64|sys|proc|root|var/spool/cron)";

/// Ordered deny-list. The first match decides the reported category.
static BLOCKED_PATTERNS: LazyLock<Vec<(BlockedCategory, Regex)>> = LazyLock::new(|| {
    use BlockedCategory::*;

    let raw: Vec<(BlockedCategory, String)> = vec![
        (Markup, r"(?i)<\s*/?\s*script\b".into()),
        (Markup, r"(?i)javascript\s*:".into()),
        // rm -rf /, rm -rf /*, rm --no-preserve-root, mv / ..., cp -r / ...
        (RootPath, r"\b(rm|mv|cp)\s+(-{1,2}[\w-]+\s+)*(--\s+)?/\*?(\s|$|;|&|\|)".into()),
        (RootPath, r"\brm\s+.*--no-preserve-root".into()),
        (RootPath, format!(r"\brm\s+(-{{1,2}}[\w-]+\s+)*(--\s+)?(/{SYSTEM_DIRS}|~|\$HOME)/?\*?(\s|$|;|&|\|)")),
        (Permissions, r"\bchmod\s+(-{1,2}[\w-]+\s+)*(0?[0-7]?777|a?\+rwx|[ugoa]*\+[rwxX]*s)\b".into()),
        (Permissions, r"\bchmod\s+(-{1,2}[\w-]+\s+)*\S+\s+/(\s|$|\*)".into()),
        (Permissions, format!(r"\bchown\s+(-{{1,2}}[\w-]+\s+)*\S+\s+/({SYSTEM_DIRS}\b|\s|$|\*)")),
        (PrivilegeEscalation, r"\b(sudo|doas|pkexec|visudo)\b".into()),
        (PrivilegeEscalation, r"(^|[\s;&|(`])su(\s|$)".into()),
        (PrivilegeEscalation, r"/etc/(sudoers|shadow|passwd)\b".into()),
        (PrivilegeEscalation, r"\b(useradd|usermod|userdel|adduser|groupadd|passwd)\b".into()),
        (DownloadExecute, r"\b(curl|wget|fetch)\b[^\n]*\|\s*(sudo\s+)?(\S*/)?(ba|z|k|da|c|tc|fi)?sh\b".into()),
        (DownloadExecute, r"\b(curl|wget|fetch)\b[^\n]*\|\s*(sudo\s+)?(\S*/)?(python[0-9.]*|perl|ruby|node|php)\b".into()),
        (DownloadExecute, r"\b(ba|z|k|da)?sh\s+(-c\s+)?\S*\s*<\(\s*(curl|wget)\b".into()),
        (DownloadExecute, r"\$\(\s*(curl|wget)\b".into()),
        (DownloadExecute, r"\b(curl|wget)\b[^\n]*&&\s*(chmod\s+\+x|\./|(ba)?sh\s)".into()),
        (ReverseShell, r"/dev/(tcp|udp)/".into()),
        (ReverseShell, r"\b(nc|ncat|netcat)\b[^\n]*\s-[a-zA-Z]*[ec]\b".into()),
        (ReverseShell, r"(?i)\bsocat\b[^\n]*\bexec:".into()),
        (ReverseShell, r"\bmkfifo\b[^\n]*\b(nc|ncat|netcat|telnet)\b".into()),
        (ReverseShell, r"\b(ba)?sh\s+-i\b[^\n]*[<>]&".into()),
        (CodeEvaluation, r"\beval\b".into()),
        (CodeEvaluation, r"\bexec\s*\(".into()),
        (CodeEvaluation, r"\b(python[0-9.]*|perl|ruby|node|lua)\s+(-\w+\s+)*-[ce]\b".into()),
        (CodeEvaluation, r"\bphp\s+(-\w+\s+)*-r\b".into()),
        (CodeEvaluation, r"\bbase64\s+(-d|--decode|-D)\b[^\n]*\|".into()),
        (SystemRedirect, format!(r">{{1,2}}\s*/{SYSTEM_DIRS}(/|\s|$)")),
        (SystemRedirect, r">{1,2}\s*/dev/(sd|hd|nvme|xvd|vd|mmcblk)".into()),
        (SystemRedirect, format!(r"\btee\s+(-\w+\s+)*/{SYSTEM_DIRS}(/|\s|$)")),
        (ChainedShell, r"(\||;|&&|\|\|)\s*(sudo\s+)?(/usr)?(/bin/)?(ba|z|k|da|c|tc|fi)?sh(\s|$|;)".into()),
        (Destructive, r"\bmkfs(\.\w+)?\b".into()),
        (Destructive, r"\bdd\b[^\n]*\bof=/dev/".into()),
        (Destructive, r"\b(fdisk|sfdisk|parted|wipefs|shred)\b".into()),
        (Destructive, r"(?i)\bformat\s+[a-z]:".into()),
        (Destructive, r"\b(shutdown|reboot|halt|poweroff)\b".into()),
        (Destructive, r"\b(init|telinit)\s+[06]\b".into()),
        (Destructive, r":\s*\(\s*\)\s*\{[^}]*:\s*\|\s*:".into()),
        (ServiceLifecycle, r"\bsystemctl\s+(-\S+\s+)*(stop|disable|mask|kill|restart|isolate|poweroff|reboot|halt)\b".into()),
        (ServiceLifecycle, r"\bservice\s+\S+\s+(stop|restart)\b".into()),
        (ServiceLifecycle, r"\b(docker|podman)\s+(rm|rmi|kill|stop|system\s+prune|container\s+(rm|kill|stop|prune))\b".into()),
        (ServiceLifecycle, r"\b(docker|podman)\s+run\b[^\n]*--privileged".into()),
        (ServiceLifecycle, r"\bkubectl\s+(delete|drain|cordon)\b".into()),
        (ServiceLifecycle, r"\bkill(all)?\s+(-\w+\s+)*-?1(\s|$)".into()),
    ];

    raw.into_iter()
        .filter_map(|(category, pattern)| match Regex::new(&pattern) {
            Ok(regex) => Some((category, regex)),
            Err(e) => {
                tracing::error!(pattern = %pattern, error = %e, "skipping invalid blocked pattern");
                None
            }
        })
        .collect()
});

/// Find the first blocked category matching `command`, if any.
pub fn blocked_category(command: &str) -> Option<BlockedCategory> {
    BLOCKED_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(command))
        .map(|(category, _)| *category)
}
