use std::cmp::Ordering;

/// Pick the numerically largest version present in both lists.
///
/// Versions compare component-wise as dot-separated integers, so `2.10` beats `2.9`.
#[must_use]
pub fn largest_common_version(core_versions: &[String], supported: &[String]) -> Option<String> {
    core_versions
        .iter()
        .filter(|version| supported.contains(version))
        .filter_map(|version| parse(version).map(|parts| (parts, version)))
        .max_by(|(a, _), (b, _)| compare(a, b))
        .map(|(_, version)| version.clone())
}

fn parse(version: &str) -> Option<Vec<u64>> {
    version
        .trim()
        .split('.')
        .map(|part| part.parse().ok())
        .collect()
}

fn compare(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            a.get(i)
                .copied()
                .unwrap_or(0)
                .cmp(&b.get(i).copied().unwrap_or(0))
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn picks_numerically_largest() {
        let core = strings(&["2.8", "2.9", "2.10", "3.0"]);
        let supported = strings(&["2.9", "2.10", "2.11"]);
        assert_eq!(
            largest_common_version(&core, &supported).as_deref(),
            Some("2.10")
        );
    }

    #[test]
    fn no_overlap() {
        assert!(largest_common_version(&strings(&["1.0"]), &strings(&["2.9"])).is_none());
    }

    #[test]
    fn missing_components_count_as_zero() {
        assert_eq!(compare(&[2], &[2, 0]), Ordering::Equal);
        assert_eq!(compare(&[3], &[2, 13]), Ordering::Greater);
    }
}
