/// Rewrites the suffix of a DN from one naming context to another, for
/// replicas whose local database lives under a different DN than the
/// provider's (spec §4.3 "rewrite any DN-syntax attribute value").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixRewrite {
    pub from: String,
    pub to: String,
}

impl SuffixRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Rewrites `dn` if it falls under `from`, leaving it untouched
    /// otherwise. Suffix comparison is case-insensitive (DN matching
    /// rules fold case on RDN type names in practice); the replaced
    /// segment is not re-normalized here -- that is schema's job.
    pub fn rewrite(&self, dn: &str) -> String {
        match strip_suffix_ci(dn, &self.from) {
            Some(prefix) if prefix.is_empty() => self.to.clone(),
            Some(prefix) => format!("{prefix}{}", self.to),
            None => dn.to_string(),
        }
    }

    pub fn inverted(&self) -> Self {
        Self::new(self.to.clone(), self.from.clone())
    }
}

fn strip_suffix_ci<'a>(dn: &'a str, suffix: &str) -> Option<&'a str> {
    if dn.len() < suffix.len() {
        return None;
    }
    let split = dn.len() - suffix.len();
    let (prefix, tail) = dn.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_matching_suffix() {
        let rule = SuffixRewrite::new("dc=old,dc=example", "dc=new,dc=example");
        assert_eq!(
            rule.rewrite("ou=people,dc=old,dc=example"),
            "ou=people,dc=new,dc=example"
        );
    }

    #[test]
    fn leaves_non_matching_dn_alone() {
        let rule = SuffixRewrite::new("dc=old,dc=example", "dc=new,dc=example");
        assert_eq!(rule.rewrite("ou=people,dc=other"), "ou=people,dc=other");
    }

    #[test]
    fn rewrites_exact_suffix_match() {
        let rule = SuffixRewrite::new("dc=old,dc=example", "dc=new,dc=example");
        assert_eq!(rule.rewrite("dc=old,dc=example"), "dc=new,dc=example");
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let rule = SuffixRewrite::new("DC=old,DC=example", "dc=new,dc=example");
        assert_eq!(
            rule.rewrite("ou=people,dc=OLD,dc=EXAMPLE"),
            "ou=people,dc=new,dc=example"
        );
    }

    #[test]
    fn inverted_swaps_directions() {
        let rule = SuffixRewrite::new("dc=old,dc=example", "dc=new,dc=example");
        let inv = rule.inverted();
        assert_eq!(inv.rewrite("ou=people,dc=new,dc=example"), "ou=people,dc=old,dc=example");
    }
}
