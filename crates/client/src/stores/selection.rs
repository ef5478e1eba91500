//! Selection lifecycle: `Idle → Selecting → Loading → Idle`.
//!
//! Every selection gets a generation number. Async work started for a
//! selection carries its [`SelectionTicket`]; results are only committed
//! while the ticket is still current.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionPhase {
    #[default]
    Idle,
    /// Debouncing before the history fetch.
    Selecting { target: String },
    /// History fetch in flight.
    Loading { target: String },
}

impl SelectionPhase {
    pub fn is_busy(&self) -> bool {
        !matches!(self, SelectionPhase::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    generation: u64,
    target: String,
}

impl SelectionTicket {
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SelectDecision {
    /// Target already selected (idle, or its selection is in flight).
    Unchanged,
    Begin(SelectionTicket),
}

#[derive(Debug, Default)]
pub struct Selection {
    selected: Option<String>,
    phase: SelectionPhase,
    generation: u64,
}

impl Selection {
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.as_deref() == Some(id)
    }

    pub fn phase(&self) -> &SelectionPhase {
        &self.phase
    }

    /// Start selecting `target`. A different target supersedes any selection
    /// in flight; the superseded ticket stops being current.
    ///
    /// Re-selecting the current target is a no-op while its selection is in
    /// flight or once its history is `loaded`. After a failed load it starts
    /// over.
    pub fn begin(&mut self, target: &str, loaded: bool) -> SelectDecision {
        if self.is_selected(target) && (self.phase.is_busy() || loaded) {
            return SelectDecision::Unchanged;
        }
        self.generation += 1;
        self.selected = Some(target.to_string());
        self.phase = SelectionPhase::Selecting {
            target: target.to_string(),
        };
        SelectDecision::Begin(SelectionTicket {
            generation: self.generation,
            target: target.to_string(),
        })
    }

    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        ticket.generation == self.generation
    }

    /// `Selecting → Loading`. False when the ticket was superseded.
    pub fn start_loading(&mut self, ticket: &SelectionTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.phase = SelectionPhase::Loading {
            target: ticket.target.clone(),
        };
        true
    }

    /// Back to `Idle`. False when the ticket was superseded, in which case
    /// the phase belongs to a newer selection and is left alone.
    pub fn finish(&mut self, ticket: &SelectionTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.phase = SelectionPhase::Idle;
        true
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.selected = None;
        self.phase = SelectionPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(decision: SelectDecision) -> SelectionTicket {
        match decision {
            SelectDecision::Begin(ticket) => ticket,
            SelectDecision::Unchanged => panic!("expected a new selection"),
        }
    }

    #[test]
    fn reselecting_in_flight_target_is_unchanged() {
        let mut selection = Selection::default();
        let first = ticket(selection.begin("c1", false));
        assert_eq!(selection.begin("c1", false), SelectDecision::Unchanged);
        assert!(selection.start_loading(&first));
        assert_eq!(selection.begin("c1", false), SelectDecision::Unchanged);
        assert!(selection.finish(&first));
        assert_eq!(selection.phase(), &SelectionPhase::Idle);
        assert_eq!(selection.begin("c1", true), SelectDecision::Unchanged);
    }

    #[test]
    fn reselecting_after_failed_load_starts_over() {
        let mut selection = Selection::default();
        let first = ticket(selection.begin("c1", false));
        assert!(selection.start_loading(&first));
        assert!(selection.finish(&first));

        let retry = ticket(selection.begin("c1", false));
        assert!(!selection.is_current(&first));
        assert!(selection.is_current(&retry));
        assert_eq!(
            selection.phase(),
            &SelectionPhase::Selecting { target: "c1".into() }
        );
    }

    #[test]
    fn newer_target_supersedes_loading_one() {
        let mut selection = Selection::default();
        let c1 = ticket(selection.begin("c1", false));
        assert!(selection.start_loading(&c1));
        let c2 = ticket(selection.begin("c2", false));

        assert!(!selection.finish(&c1));
        assert_eq!(
            selection.phase(),
            &SelectionPhase::Selecting { target: "c2".into() }
        );
        assert!(selection.start_loading(&c2));
        assert!(selection.finish(&c2));
        assert_eq!(selection.selected(), Some("c2"));
    }

    #[test]
    fn clear_invalidates_tickets() {
        let mut selection = Selection::default();
        let c1 = ticket(selection.begin("c1", false));
        selection.clear();
        assert!(!selection.start_loading(&c1));
        assert_eq!(selection.selected(), None);
        assert!(!selection.phase().is_busy());
    }
}
