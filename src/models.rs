// src/models.rs

/// How many values a recognized emulator flag consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagArity {
    /// Presence only, no value (`-nographic`).
    Boolean,
    /// One following value; a re-occurrence overwrites it (`-m 128`).
    Single,
    /// One following value per occurrence, accumulated in order (`-net ...`).
    Repeatable,
}

/// A recognized emulator flag and its arity.
#[derive(Debug, Clone, Copy)]
pub struct FlagDef {
    pub name: &'static str,
    pub arity: FlagArity,
}

const fn flag(name: &'static str, arity: FlagArity) -> FlagDef {
    FlagDef { name, arity }
}

/// The fixed table of emulator flags this tool understands. Anything outside
/// this table is kept as a diagnostic and never re-emitted.
pub const FLAG_TABLE: &[FlagDef] = &[
    flag("nographic", FlagArity::Boolean),
    flag("no-reboot", FlagArity::Boolean),
    flag("no-shutdown", FlagArity::Boolean),
    flag("enable-kvm", FlagArity::Boolean),
    flag("snapshot", FlagArity::Boolean),
    flag("monitor", FlagArity::Single),
    flag("display", FlagArity::Single),
    flag("kernel", FlagArity::Single),
    flag("initrd", FlagArity::Single),
    flag("append", FlagArity::Single),
    flag("m", FlagArity::Single),
    flag("cpu", FlagArity::Single),
    flag("smp", FlagArity::Single),
    flag("serial", FlagArity::Single),
    flag("machine", FlagArity::Single),
    flag("accel", FlagArity::Single),
    flag("boot", FlagArity::Single),
    flag("L", FlagArity::Single),
    flag("hda", FlagArity::Single),
    flag("hdb", FlagArity::Single),
    flag("hdc", FlagArity::Single),
    flag("hdd", FlagArity::Single),
    flag("cdrom", FlagArity::Single),
    flag("net", FlagArity::Repeatable),
    flag("netdev", FlagArity::Repeatable),
    flag("fsdev", FlagArity::Repeatable),
    flag("drive", FlagArity::Repeatable),
    flag("chardev", FlagArity::Repeatable),
    flag("blockdev", FlagArity::Repeatable),
    flag("tpmdev", FlagArity::Repeatable),
    flag("numa", FlagArity::Repeatable),
    flag("global", FlagArity::Repeatable),
    flag("device", FlagArity::Repeatable),
    flag("object", FlagArity::Repeatable),
    flag("virtfs", FlagArity::Repeatable),
];

/// Looks up a flag name (without its leading dashes) in the table.
pub fn lookup_flag(name: &str) -> Option<&'static FlagDef> {
    FLAG_TABLE.iter().find(|def| def.name == name)
}

/// The value a parsed flag carries, per its arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Present,
    Single(String),
    List(Vec<String>),
}

/// One recognized flag as it occurred in the launch script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFlag {
    pub name: &'static str,
    pub value: FlagValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Important,
}

/// A single result of the launch-flag analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn important(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Important,
            message: message.into(),
        }
    }
}

/// The guest-side identity of the probing shell, parsed from `id` output.
/// Owner and group columns of a long listing may show either numeric ids or
/// symbolic names, so both forms are kept for comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub uid_name: Option<String>,
    pub gid: String,
    pub gid_name: Option<String>,
}

impl Identity {
    /// Parses the first two fields of `id` output, e.g.
    /// `uid=1000(ctf) gid=1000(ctf) groups=1000(ctf)`.
    pub fn parse(id_output: &str) -> Option<Self> {
        let mut fields = id_output.split_whitespace();
        let uid_field = fields.next()?.strip_prefix("uid=")?;
        let gid_field = fields.next()?.strip_prefix("gid=")?;
        let (uid, uid_name) = split_id_field(uid_field);
        let (gid, gid_name) = split_id_field(gid_field);
        Some(Self {
            uid,
            uid_name,
            gid,
            gid_name,
        })
    }

    /// Whether a listing's owner column refers to this identity's user.
    pub fn matches_user(&self, owner: &str) -> bool {
        owner == self.uid || self.uid_name.as_deref() == Some(owner)
    }

    /// Whether a listing's group column refers to this identity's group.
    pub fn matches_group(&self, group: &str) -> bool {
        group == self.gid || self.gid_name.as_deref() == Some(group)
    }
}

fn split_id_field(field: &str) -> (String, Option<String>) {
    match field.split_once('(') {
        Some((id, name)) => (id.to_string(), Some(name.trim_end_matches(')').to_string())),
        None => (field.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_flag() {
        assert_eq!(lookup_flag("m").map(|d| d.arity), Some(FlagArity::Single));
        assert_eq!(
            lookup_flag("net").map(|d| d.arity),
            Some(FlagArity::Repeatable)
        );
        assert_eq!(
            lookup_flag("nographic").map(|d| d.arity),
            Some(FlagArity::Boolean)
        );
        assert!(lookup_flag("not-a-flag").is_none());
    }

    #[test]
    fn test_identity_parse_with_names() {
        let id = Identity::parse("uid=1000(ctf) gid=1000(ctf) groups=1000(ctf)").unwrap();
        assert_eq!(id.uid, "1000");
        assert_eq!(id.uid_name.as_deref(), Some("ctf"));
        assert_eq!(id.gid, "1000");
        assert_eq!(id.gid_name.as_deref(), Some("ctf"));
    }

    #[test]
    fn test_identity_parse_numeric_only() {
        let id = Identity::parse("uid=1000 gid=50").unwrap();
        assert_eq!(id.uid, "1000");
        assert!(id.uid_name.is_none());
        assert_eq!(id.gid, "50");
    }

    #[test]
    fn test_identity_matching() {
        let id = Identity::parse("uid=1000(ctf) gid=100(users)").unwrap();
        assert!(id.matches_user("1000"));
        assert!(id.matches_user("ctf"));
        assert!(!id.matches_user("root"));
        assert!(id.matches_group("100"));
        assert!(id.matches_group("users"));
        assert!(!id.matches_group("wheel"));
    }

    #[test]
    fn test_identity_parse_rejects_garbage() {
        assert!(Identity::parse("command not found").is_none());
        assert!(Identity::parse("").is_none());
    }
}
