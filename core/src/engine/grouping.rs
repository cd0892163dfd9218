//! Single-pass folding of a sorted row stream into grouped records.

/// Folds `rows` into one record per run of equal keys.
///
/// `rows` must already be sorted so that equal keys are adjacent; this is a
/// precondition and is not checked. A key that reappears after a different
/// key opens a second group. Groups come out in order of first occurrence.
pub fn fold_sorted<R, K, G, KeyFn, OpenFn, AppendFn>(
    rows: impl IntoIterator<Item = R>,
    key: KeyFn,
    mut open: OpenFn,
    mut append: AppendFn,
) -> Vec<G>
where
    K: PartialEq,
    KeyFn: Fn(&R) -> K,
    OpenFn: FnMut(&R) -> G,
    AppendFn: FnMut(&mut G, R),
{
    let mut groups: Vec<G> = Vec::new();
    let mut current: Option<K> = None;
    for row in rows {
        let row_key = key(&row);
        if current.as_ref() != Some(&row_key) {
            groups.push(open(&row));
            current = Some(row_key);
        }
        if let Some(group) = groups.last_mut() {
            append(group, row);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Group {
        key: u32,
        members: Vec<char>,
    }

    fn fold(rows: Vec<(u32, char)>) -> Vec<Group> {
        fold_sorted(
            rows,
            |row| row.0,
            |row| Group {
                key: row.0,
                members: Vec::new(),
            },
            |group, row| group.members.push(row.1),
        )
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(fold(Vec::new()).is_empty());
    }

    #[test]
    fn adjacent_keys_share_a_group() {
        let groups = fold(vec![(1, 'S'), (1, 'U'), (2, 'S')]);
        assert_eq!(
            groups,
            vec![
                Group {
                    key: 1,
                    members: vec!['S', 'U'],
                },
                Group {
                    key: 2,
                    members: vec!['S'],
                },
            ]
        );
    }

    #[test]
    fn unsorted_input_splits_groups() {
        let groups = fold(vec![(1, 'S'), (2, 'S'), (1, 'U')]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[2].key, 1);
    }
}
