/// Whether the identities a caller authenticated with are exactly the URIs
/// its CSR asks for.
///
/// Order-insensitive but multiset-exact: cardinalities must agree and the
/// sorted lists must be element-wise equal, so a duplicated identity only
/// matches an equally duplicated one and subsets never match.
pub fn identities_match<C, U>(caller_identities: &[C], csr_uris: &[U]) -> bool
where
    C: AsRef<str>,
    U: AsRef<str>,
{
    if caller_identities.len() != csr_uris.len() {
        return false;
    }
    let mut caller: Vec<&str> = caller_identities.iter().map(AsRef::as_ref).collect();
    let mut requested: Vec<&str> = csr_uris.iter().map(AsRef::as_ref).collect();
    caller.sort_unstable();
    requested.sort_unstable();
    caller == requested
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn order_does_not_matter() {
        assert!(identities_match(&["a", "b"], &["b", "a"]));
        assert!(identities_match(&["a", "b", "c"], &["c", "a", "b"]));
    }

    #[test]
    fn cardinality_must_agree() {
        assert!(!identities_match(&["a"], &["a", "b"]));
        assert!(!identities_match(&["a", "b"], &["a"]));
        assert!(!identities_match(&NONE, &["a"]));
    }

    #[test]
    fn empty_sets_match() {
        assert!(identities_match(&NONE, &NONE));
    }

    #[test]
    fn duplicates_are_significant() {
        assert!(identities_match(&["a", "a"], &["a", "a"]));
        assert!(!identities_match(&["a", "a"], &["a", "b"]));
        assert!(!identities_match(&["a", "b"], &["a", "a"]));
    }

    #[test]
    fn different_identities_do_not_match() {
        assert!(!identities_match(
            &["spiffe://cluster.local/ns/default/sa/web"],
            &["spiffe://cluster.local/ns/default/sa/db"],
        ));
    }

    #[test]
    fn accepts_owned_strings() {
        let caller = vec!["spiffe://td/ns/a/sa/b".to_string()];
        let uris = vec![String::from("spiffe://td/ns/a/sa/b")];
        assert!(identities_match(&caller, &uris));
    }
}
