use crate::models::ServiceItem;

/// Resolves which catalog service an utterance refers to. Exact name match
/// wins, then the longest unambiguous name mentioned in the text, then
/// aliases. No match or a genuine tie yields None — never a guess.
pub fn resolve<'a>(text: &str, services: &'a [ServiceItem]) -> Option<&'a ServiceItem> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() || services.is_empty() {
        return None;
    }

    if let Some(exact) = services.iter().find(|s| s.name.to_lowercase() == needle) {
        return Some(exact);
    }

    let mut named: Vec<&ServiceItem> = services
        .iter()
        .filter(|s| needle.contains(&s.name.to_lowercase()))
        .collect();
    // "spa manicure" mentions both "Spa Manicure" and "Manicure": the longer
    // name is the more specific reference
    named.sort_by_key(|s| std::cmp::Reverse(s.name.len()));
    match named.as_slice() {
        [single] => return Some(single),
        [first, second, ..] if first.name.len() > second.name.len() => return Some(first),
        [] => {}
        _ => return None,
    }

    let aliased: Vec<&ServiceItem> = services
        .iter()
        .filter(|s| {
            s.aliases
                .iter()
                .any(|a| !a.trim().is_empty() && needle.contains(&a.to_lowercase()))
        })
        .collect();
    match aliased.as_slice() {
        [single] => Some(single),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(id: &str, name: &str, aliases: &[&str]) -> ServiceItem {
        ServiceItem {
            id: id.to_string(),
            business_id: "b1".to_string(),
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            duration_minutes: 60,
            deposit_required: false,
            active: true,
        }
    }

    fn catalog() -> Vec<ServiceItem> {
        vec![
            svc("s1", "Haircut", &["cut", "trim"]),
            svc("s2", "Manicure", &[]),
            svc("s3", "Spa Manicure", &["spa"]),
        ]
    }

    #[test]
    fn test_exact_name() {
        let services = catalog();
        assert_eq!(resolve("haircut", &services).unwrap().id, "s1");
    }

    #[test]
    fn test_name_inside_sentence() {
        let services = catalog();
        assert_eq!(
            resolve("I'd like a haircut tomorrow", &services).unwrap().id,
            "s1"
        );
    }

    #[test]
    fn test_longest_name_wins() {
        let services = catalog();
        assert_eq!(
            resolve("book me a spa manicure please", &services).unwrap().id,
            "s3"
        );
    }

    #[test]
    fn test_alias_match() {
        let services = catalog();
        assert_eq!(resolve("just a quick trim", &services).unwrap().id, "s1");
    }

    #[test]
    fn test_no_match() {
        let services = catalog();
        assert!(resolve("a massage please", &services).is_none());
    }

    #[test]
    fn test_ambiguous_alias_yields_none() {
        let services = vec![
            svc("s1", "Gel Nails", &["nails"]),
            svc("s2", "Acrylic Nails", &["nails"]),
        ];
        assert!(resolve("can I get nails done", &services).is_none());
    }
}
