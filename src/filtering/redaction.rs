// Literal substring redaction over detected regions

use crate::facts::Region;

/// Drops regions whose text contains any redaction term
///
/// Matching is a case-sensitive literal substring test with no tokenization
/// or normalization. Term lists are small, so no index is built.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedactionFilter;

impl RedactionFilter {
    /// Keep the regions that match no term, preserving input order
    pub fn filter(regions: &[Region], terms: &[String]) -> Vec<Region> {
        regions
            .iter()
            .filter(|region| !Self::is_redacted(region, terms))
            .cloned()
            .collect()
    }

    /// True if any term occurs in the region text
    pub fn is_redacted(region: &Region, terms: &[String]) -> bool {
        terms.iter().any(|term| region.text.contains(term.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_excludes_matching_region() {
        let regions = vec![
            Region::new("Alice", 10, 20, 100, 30),
            Region::new("World", 50, 70, 150, 100),
        ];

        let result = RedactionFilter::filter(&regions, &terms(&["Alice"]));
        assert_eq!(result, vec![Region::new("World", 50, 70, 150, 100)]);
    }

    #[test]
    fn test_substring_match() {
        let regions = vec![
            Region::new("CPF:0000003100077280550602", 0, 0, 10, 10),
            Region::new("GABRIELNEIL", 0, 10, 10, 20),
            Region::new("invoice", 0, 20, 10, 30),
        ];

        let result =
            RedactionFilter::filter(&regions, &terms(&["0000003100077280550602", "NEIL"]));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "invoice");
    }

    #[test]
    fn test_case_sensitive() {
        let regions = vec![Region::new("neil", 0, 0, 1, 1)];
        let result = RedactionFilter::filter(&regions, &terms(&["NEIL"]));
        assert_eq!(result, regions);
    }

    #[test]
    fn test_empty_terms_keep_everything() {
        let regions = vec![
            Region::new("Hello", 10, 20, 100, 30),
            Region::new("World", 50, 70, 150, 100),
        ];
        assert_eq!(RedactionFilter::filter(&regions, &[]), regions);
    }

    #[test]
    fn test_empty_regions_yield_empty() {
        assert!(RedactionFilter::filter(&[], &terms(&["Hello"])).is_empty());
    }

    #[test]
    fn test_order_preserved() {
        let regions: Vec<Region> = ["c", "secret-b", "a", "d"]
            .iter()
            .enumerate()
            .map(|(i, t)| Region::new(*t, i as i64, 0, i as i64 + 1, 1))
            .collect();

        let kept: Vec<String> = RedactionFilter::filter(&regions, &terms(&["secret"]))
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(kept, vec!["c", "a", "d"]);
    }

    #[test]
    fn test_empty_term_matches_everything() {
        // "" is a substring of every string
        let regions = vec![Region::new("anything", 0, 0, 1, 1)];
        assert!(RedactionFilter::filter(&regions, &terms(&[""])).is_empty());
    }
}
