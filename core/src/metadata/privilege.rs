//! Privileges granted on a catalog object, folded per grantee.

use bitflags::bitflags;
use common::ident::Identifier;
use common::value::Row;
use serde::Serialize;

use crate::engine::grouping::fold_sorted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeKind {
    Select,
    Insert,
    Update,
    Delete,
    References,
    Execute,
    Member,
}

impl PrivilegeKind {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'S' => Some(PrivilegeKind::Select),
            'I' => Some(PrivilegeKind::Insert),
            'U' => Some(PrivilegeKind::Update),
            'D' => Some(PrivilegeKind::Delete),
            'R' => Some(PrivilegeKind::References),
            'X' => Some(PrivilegeKind::Execute),
            'M' => Some(PrivilegeKind::Member),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            PrivilegeKind::Select => 'S',
            PrivilegeKind::Insert => 'I',
            PrivilegeKind::Update => 'U',
            PrivilegeKind::Delete => 'D',
            PrivilegeKind::References => 'R',
            PrivilegeKind::Execute => 'X',
            PrivilegeKind::Member => 'M',
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            PrivilegeKind::Select => "SELECT",
            PrivilegeKind::Insert => "INSERT",
            PrivilegeKind::Update => "UPDATE",
            PrivilegeKind::Delete => "DELETE",
            PrivilegeKind::References => "REFERENCES",
            PrivilegeKind::Execute => "EXECUTE",
            PrivilegeKind::Member => "MEMBER OF",
        }
    }

    fn flag(&self) -> PrivilegeSet {
        match self {
            PrivilegeKind::Select => PrivilegeSet::SELECT,
            PrivilegeKind::Insert => PrivilegeSet::INSERT,
            PrivilegeKind::Update => PrivilegeSet::UPDATE,
            PrivilegeKind::Delete => PrivilegeSet::DELETE,
            PrivilegeKind::References => PrivilegeSet::REFERENCES,
            PrivilegeKind::Execute => PrivilegeSet::EXECUTE,
            PrivilegeKind::Member => PrivilegeSet::MEMBER,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrivilegeSet: u8 {
        const SELECT = 1 << 0;
        const INSERT = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const REFERENCES = 1 << 4;
        const EXECUTE = 1 << 5;
        const MEMBER = 1 << 6;
    }
}

/// What kind of object a grantee is (`rdb$user_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GranteeKind {
    Relation,
    View,
    Trigger,
    Procedure,
    User,
    Role,
    Other(i64),
}

impl GranteeKind {
    pub fn from_catalog(code: i64) -> Self {
        match code {
            0 => GranteeKind::Relation,
            1 => GranteeKind::View,
            2 => GranteeKind::Trigger,
            5 => GranteeKind::Procedure,
            8 => GranteeKind::User,
            13 => GranteeKind::Role,
            other => GranteeKind::Other(other),
        }
    }
}

/// One flat row of the privilege query.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivilegeRow {
    pub grantee: Identifier,
    pub grantee_kind: i64,
    pub grantor: Identifier,
    pub letter: char,
    pub grant_option: bool,
    pub field: Option<Identifier>,
}

impl PrivilegeRow {
    /// Columns: user, user type, grantor, privilege, grant option, field name.
    pub fn from_row(row: &Row) -> Self {
        let field = row.identifier(5);
        Self {
            grantee: row.identifier(0),
            grantee_kind: row.integer(1).unwrap_or(0),
            grantor: row.identifier(2),
            letter: row.text(3).trim().chars().next().unwrap_or(' '),
            grant_option: row.integer(4).unwrap_or(0) != 0,
            field: (!field.is_empty()).then_some(field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivilegeEntry {
    pub letter: char,
    pub kind: Option<PrivilegeKind>,
    pub grantor: Identifier,
    pub grant_option: bool,
    pub field: Option<Identifier>,
}

/// All grants one grantee holds on an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivilegeGroup {
    pub grantee: Identifier,
    pub grantee_kind: i64,
    pub entries: Vec<PrivilegeEntry>,
}

impl PrivilegeGroup {
    pub fn kind(&self) -> GranteeKind {
        GranteeKind::from_catalog(self.grantee_kind)
    }

    pub fn privileges(&self) -> PrivilegeSet {
        self.entries
            .iter()
            .filter_map(|entry| entry.kind)
            .fold(PrivilegeSet::empty(), |set, kind| set | kind.flag())
    }

    pub fn has(&self, kind: PrivilegeKind) -> bool {
        self.privileges().contains(kind.flag())
    }

    pub fn grantable(&self, kind: PrivilegeKind) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.kind == Some(kind) && entry.grant_option)
    }
}

/// Folds rows sorted by grantee, grantee kind and privilege letter into one
/// group per grantee. Unsorted input splits a grantee into several groups.
pub fn group_privileges(rows: impl IntoIterator<Item = PrivilegeRow>) -> Vec<PrivilegeGroup> {
    fold_sorted(
        rows,
        |row| (row.grantee.clone(), row.grantee_kind),
        |row| PrivilegeGroup {
            grantee: row.grantee.clone(),
            grantee_kind: row.grantee_kind,
            entries: Vec::new(),
        },
        |group, row| {
            group.entries.push(PrivilegeEntry {
                kind: PrivilegeKind::from_letter(row.letter),
                letter: row.letter,
                grantor: row.grantor,
                grant_option: row.grant_option,
                field: row.field,
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::value::Value;

    fn row(
        grantee: &str,
        kind: i64,
        grantor: &str,
        letter: char,
        option: bool,
        field: &str,
    ) -> PrivilegeRow {
        PrivilegeRow {
            grantee: grantee.into(),
            grantee_kind: kind,
            grantor: grantor.into(),
            letter,
            grant_option: option,
            field: (!field.is_empty()).then(|| field.into()),
        }
    }

    #[test]
    fn rows_fold_per_grantee_in_order() {
        let groups = group_privileges(vec![
            row("1", 0, "G1", 'S', false, ""),
            row("1", 0, "G1", 'U', false, ""),
            row("2", 0, "G1", 'S', true, ""),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].grantee, "1");
        assert_eq!(groups[0].entries.len(), 2);
        assert_eq!(groups[1].entries.len(), 1);
        assert!(groups[1].grantable(PrivilegeKind::Select));
        assert_eq!(
            groups[0].privileges(),
            PrivilegeSet::SELECT | PrivilegeSet::UPDATE
        );
    }

    #[test]
    fn grantee_kind_separates_groups() {
        let groups = group_privileges(vec![
            row("PUBLIC", 8, "SYSDBA", 'X', false, ""),
            row("PUBLIC", 13, "SYSDBA", 'X', false, ""),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind(), GranteeKind::User);
        assert_eq!(groups[1].kind(), GranteeKind::Role);
    }

    #[test]
    fn unknown_letters_are_kept_without_a_kind() {
        let groups = group_privileges(vec![row("U", 8, "SYSDBA", 'Z', false, "COL")]);
        let entry = &groups[0].entries[0];
        assert_eq!(entry.kind, None);
        assert_eq!(entry.letter, 'Z');
        assert_eq!(entry.field.as_ref().map(Identifier::as_str), Some("COL"));
        assert!(groups[0].privileges().is_empty());
    }

    #[test]
    fn catalog_row_is_trimmed() {
        let parsed = PrivilegeRow::from_row(&Row::new(vec![
            "SYSDBA   ".into(),
            Value::Integer(8),
            "SYSDBA ".into(),
            "X ".into(),
            Value::Integer(1),
            Value::Null,
        ]));
        assert_eq!(parsed.grantee, "SYSDBA");
        assert_eq!(parsed.letter, 'X');
        assert!(parsed.grant_option);
        assert_eq!(parsed.field, None);
    }
}
