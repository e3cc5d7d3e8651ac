use crate::models::{CustomerId, CustomerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortKey {
    /// Alphabetical by name.
    #[default]
    Name,
    /// Healthiest first.
    Health,
    /// Most recent login first.
    LastLogin,
}

/// Browsing state for the customer list. Deriving a view never mutates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListViewState {
    pub search_term: String,
    pub sort_key: SortKey,
    pub selected_id: Option<CustomerId>,
}

impl ListViewState {
    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    pub fn set_sort(&mut self, key: SortKey) {
        self.sort_key = key;
    }

    pub fn select(&mut self, id: CustomerId) {
        self.selected_id = Some(id);
    }

    /// Selects the customer a user typed. Ids are opaque, so the text is
    /// matched against how each id displays before falling back to parsing;
    /// `"42"` finds `Text("42")` as well as `Numeric(42)`.
    pub fn select_typed(&mut self, raw: &str, records: &[CustomerRecord]) {
        let wanted = raw.trim();
        let id = records
            .iter()
            .find(|record| record.id.to_string() == wanted)
            .map(|record| record.id.clone())
            .unwrap_or_else(|| CustomerId::parse(wanted));
        self.select(id);
    }

    /// Looks the selection up in `records`. Missing ids resolve to nothing.
    pub fn selected<'a>(&self, records: &'a [CustomerRecord]) -> Option<&'a CustomerRecord> {
        let id = self.selected_id.as_ref()?;
        records.iter().find(|record| &record.id == id)
    }

    /// Carries the selection over to a new snapshot, dropping it when its
    /// customer is gone. Returns whether the selection was cleared.
    pub fn reconcile(&mut self, records: &[CustomerRecord]) -> bool {
        if self.selected_id.is_some() && self.selected(records).is_none() {
            tracing::debug!(id = ?self.selected_id, "selected customer left the snapshot");
            self.selected_id = None;
            return true;
        }
        false
    }

    pub fn derive_view<'a>(&self, records: &'a [CustomerRecord]) -> Vec<&'a CustomerRecord> {
        let needle = self.search_term.trim().to_lowercase();
        let mut rows: Vec<&CustomerRecord> = records
            .iter()
            .filter(|record| {
                needle.is_empty()
                    || record.name.to_lowercase().contains(&needle)
                    || record.email.to_lowercase().contains(&needle)
            })
            .collect();

        match self.sort_key {
            SortKey::Name => rows.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then_with(|| a.id.cmp(&b.id))
            }),
            SortKey::Health => rows.sort_by(|a, b| {
                b.health_score
                    .total_cmp(&a.health_score)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            SortKey::LastLogin => rows.sort_by(|a, b| {
                a.last_login_days_ago
                    .cmp(&b.last_login_days_ago)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use crate::testing::{customer, named};

    fn roster() -> Vec<CustomerRecord> {
        vec![
            named(3, "emily Rodriguez", "emily.r@enterprise.com"),
            named(1, "Sarah Johnson", "sarah.j@company.com"),
            named(2, "Michael Chen", "michael.c@startup.io"),
            named(4, "David Kim", "david.k@corp.com"),
        ]
    }

    fn ids(rows: &[&CustomerRecord]) -> Vec<String> {
        rows.iter().map(|record| record.id.to_string()).collect()
    }

    #[test]
    fn search_matches_name_or_email_case_insensitively() {
        let records = roster();
        let mut state = ListViewState::default();

        state.set_search("EMILY");
        assert_eq!(ids(&state.derive_view(&records)), vec!["3"]);

        state.set_search("startup");
        assert_eq!(ids(&state.derive_view(&records)), vec!["2"]);

        state.set_search("");
        assert_eq!(state.derive_view(&records).len(), 4);
    }

    #[test]
    fn name_sort_ignores_case() {
        let state = ListViewState::default();
        assert_eq!(ids(&state.derive_view(&roster())), vec!["4", "3", "2", "1"]);
    }

    #[test]
    fn health_and_recency_sorts_put_best_first() {
        let records = vec![
            customer(1, Status::Active, 40.0, 10.0, 12),
            customer(2, Status::Active, 90.0, 10.0, 1),
            customer(3, Status::Active, 65.0, 10.0, 30),
        ];
        let mut state = ListViewState::default();

        state.set_sort(SortKey::Health);
        assert_eq!(ids(&state.derive_view(&records)), vec!["2", "3", "1"]);

        state.set_sort(SortKey::LastLogin);
        assert_eq!(ids(&state.derive_view(&records)), vec!["2", "1", "3"]);
    }

    #[test]
    fn selection_survives_refresh_when_customer_remains() {
        let mut state = ListViewState::default();
        state.select(CustomerId::from(2));

        let next = roster();
        assert!(!state.reconcile(&next));
        assert_eq!(state.selected(&next).map(|record| record.name.as_str()), Some("Michael Chen"));
    }

    #[test]
    fn selection_clears_when_customer_disappears() {
        let snapshot_n: Vec<_> = (1..=8).map(|id| customer(id, Status::Active, 60.0, 10.0, 1)).collect();
        let snapshot_next: Vec<_> = snapshot_n.iter().filter(|r| r.id != CustomerId::from(7)).cloned().collect();

        let mut state = ListViewState::default();
        state.select(CustomerId::from(7));
        assert!(state.selected(&snapshot_n).is_some());

        assert!(state.reconcile(&snapshot_next));
        assert_eq!(state.selected_id, None);
        assert!(state.selected(&snapshot_next).is_none());
    }

    #[test]
    fn typed_selection_finds_digit_string_ids() {
        let mut text_id = customer(1, Status::Active, 60.0, 10.0, 1);
        text_id.id = CustomerId::from("42");
        let records = vec![text_id, customer(7, Status::Active, 60.0, 10.0, 1)];

        let mut state = ListViewState::default();
        state.select_typed(" 42 ", &records);
        assert_eq!(state.selected_id, Some(CustomerId::from("42")));
        assert!(!state.reconcile(&records));

        state.select_typed("7", &records);
        assert_eq!(state.selected_id, Some(CustomerId::from(7)));

        state.select_typed("cus_404", &records);
        assert!(state.reconcile(&records));
        assert_eq!(state.selected_id, None);
    }

    #[test]
    fn deriving_a_view_leaves_state_untouched() {
        let mut state = ListViewState::default();
        state.set_search("kim");
        state.select(CustomerId::from(99));
        let before = state.clone();
        let _ = state.derive_view(&roster());
        assert_eq!(state, before);
    }
}
