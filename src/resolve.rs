use anyhow::Result;

/// Trait for recorded resources that can be resolved by address, id, or id prefix.
pub trait Identifiable {
    fn id(&self) -> &str;
    /// `<kind>.<name>`.
    fn address(&self) -> String;
    fn name(&self) -> &str;
}

impl<T: Identifiable> Identifiable for &T {
    fn id(&self) -> &str {
        (*self).id()
    }
    fn address(&self) -> String {
        (*self).address()
    }
    fn name(&self) -> &str {
        (*self).name()
    }
}

/// Resolve a user-provided identifier to one item.
///
/// The resolution strategy:
/// 1. Exact address (`service.infraapi`) or provider id
/// 2. Bare name, if only one kind uses it
/// 3. Id prefix (must be unique)
pub fn resolve_id<'a, T: Identifiable>(
    input: &str,
    items: &'a [T],
    entity_name: &str,
) -> Result<&'a T> {
    if let Some(item) = items
        .iter()
        .find(|item| item.address() == input || item.id() == input)
    {
        return Ok(item);
    }

    let by_name: Vec<_> = items.iter().filter(|item| item.name() == input).collect();
    match by_name.len() {
        0 => {}
        1 => return Ok(by_name[0]),
        _ => {
            let candidates: Vec<String> = by_name.iter().map(|i| i.address()).collect();
            return Err(anyhow::anyhow!(
                "Ambiguous: '{}' names {}. Use the full address.",
                input,
                candidates.join(", ")
            ));
        }
    }

    let matches: Vec<_> = items
        .iter()
        .filter(|item| item.id().starts_with(input))
        .collect();
    match matches.len() {
        1 => Ok(matches[0]),
        0 => Err(anyhow::anyhow!(
            "No {} found with address, name or id '{}'",
            entity_name,
            input
        )),
        n => Err(anyhow::anyhow!(
            "Ambiguous: {} {}s match prefix '{}'. Be more specific.",
            n,
            entity_name,
            input
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Item(&'static str, &'static str, &'static str);

    impl Identifiable for Item {
        fn id(&self) -> &str {
            self.2
        }
        fn address(&self) -> String {
            format!("{}.{}", self.0, self.1)
        }
        fn name(&self) -> &str {
            self.1
        }
    }

    fn items() -> Vec<Item> {
        vec![
            Item("service", "infraapi", "svc-0a1b2c3d"),
            Item("discovery", "infraapi", "srv-99aa0011"),
            Item("service", "infraweb", "svc-0a1bffff"),
        ]
    }

    #[test]
    fn exact_address_and_id() {
        let items = items();
        assert_eq!(resolve_id("discovery.infraapi", &items, "resource").unwrap().2, "srv-99aa0011");
        assert_eq!(resolve_id("svc-0a1bffff", &items, "resource").unwrap().1, "infraweb");
    }

    #[test]
    fn shared_name_is_ambiguous() {
        let err = resolve_id("infraapi", &items(), "resource").unwrap_err();
        assert!(err.to_string().contains("service.infraapi"));
    }

    #[test]
    fn prefix_must_be_unique() {
        let items = items();
        assert!(resolve_id("svc-0a1b", &items, "resource").is_err());
        assert_eq!(resolve_id("svc-0a1b2", &items, "resource").unwrap().1, "infraapi");
        assert!(resolve_id("nope", &items, "resource").is_err());
    }
}
