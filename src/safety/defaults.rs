/// Returns the default shell blocklist of (pattern, reason) tuples.
/// This list catches obvious dangerous patterns but is not a security boundary.
/// The workspace guard (canonical path checking on writes) is the primary defense.
pub fn default_blocklist() -> Vec<(String, String)> {
    vec![
        // Privilege escalation
        (r"(?i)\bsudo\b".into(), "Privilege escalation (sudo) not allowed".into()),
        (r"(?i)\bsu\b\s".into(), "Privilege escalation (su) not allowed".into()),
        (r"(?i)\bdoas\b".into(), "Privilege escalation (doas) not allowed".into()),
        // Destructive filesystem operations at root
        (r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/($|\s)".into(), "Recursive deletion at root not allowed".into()),
        (r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/\*".into(), "Recursive deletion at root not allowed".into()),
        // System directory writes
        (r">\s*/etc/".into(), "Write to /etc not allowed".into()),
        (r">\s*/usr/".into(), "Write to /usr not allowed".into()),
        (r">\s*/boot/".into(), "Write to /boot not allowed".into()),
        // Disk-level destructive operations
        (r"(?i)\bmkfs\b".into(), "Filesystem formatting not allowed".into()),
        (r"(?i)\bdd\b\s.*of=/dev/".into(), "Direct device writes not allowed".into()),
        // Fork bomb patterns
        (r":\(\)\s*\{.*\}".into(), "Fork bomb pattern detected".into()),
        // System shutdown/reboot
        (r"(?i)\bshutdown\b".into(), "System shutdown not allowed".into()),
        (r"(?i)\breboot\b".into(), "System reboot not allowed".into()),
        (r"(?i)\bpoweroff\b".into(), "System poweroff not allowed".into()),
    ]
}

/// Commands a sub-agent never inherits, whatever the configuration says:
/// browsing, long-term memory access, file system access, shell execution,
/// agent spawning/management and task introspection.
pub const SUB_AGENT_BLOCK_LIST: &[&str] = &[
    // network browsing
    "browse_website",
    "get_text_summary",
    "get_hyperlinks",
    "google",
    "download_file",
    "clone_repository",
    // memory store
    "memory_save",
    "memory_load",
    // file system
    "read_file",
    "write_to_file",
    "append_to_file",
    "delete_file",
    "file_exists",
    "create_file",
    "replace_in_file",
    "search_files",
    "execute_python_file",
    // shell
    "execute_shell",
    "execute_shell_popen",
    // media
    "generate_image",
    // spawning and agent management
    "start_sub_agent",
    "start_agent",
    "message_agent",
    "list_agents",
    "delete_agent",
    // task introspection
    "check_task_completion",
];
