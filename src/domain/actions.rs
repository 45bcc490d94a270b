//! Static action tables.
//!
//! Each reactive component type declares the actions a client may invoke as a
//! table of named handler functions. The table is validated when an instance
//! is registered, so dispatch never has to guess at method names.

use serde_json::Value;

use super::error::{ActionError, ActionTableError};

/// Handler invoked with the component and the request's `event` payload.
pub type ActionFn<C> = fn(&mut C, &Value) -> Result<(), ActionError>;

pub struct ActionTable<C> {
    component: &'static str,
    entries: Vec<(&'static str, ActionFn<C>)>,
}

impl<C> ActionTable<C> {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            entries: Vec::new(),
        }
    }

    pub fn action(mut self, name: &'static str, handler: ActionFn<C>) -> Self {
        self.entries.push((name, handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<ActionFn<C>> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, handler)| *handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn validate(&self) -> Result<(), ActionTableError> {
        if self.entries.is_empty() {
            return Err(ActionTableError::Empty {
                component: self.component,
            });
        }

        for (index, (name, _)) in self.entries.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ActionTableError::BlankName {
                    component: self.component,
                });
            }
            if self.entries[..index].iter().any(|(seen, _)| seen == name) {
                return Err(ActionTableError::Duplicate {
                    component: self.component,
                    name,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tally(i64);

    fn bump(tally: &mut Tally, _event: &Value) -> Result<(), ActionError> {
        tally.0 += 1;
        Ok(())
    }

    #[test]
    fn lookup_returns_registered_handler() {
        let table = ActionTable::new("Tally").action("bump", bump);
        let handler = table.get("bump").expect("handler");

        let mut tally = Tally(0);
        handler(&mut tally, &Value::Null).expect("invoke");
        assert_eq!(tally.0, 1);
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn validate_rejects_empty_tables() {
        let table: ActionTable<Tally> = ActionTable::new("Tally");
        assert_eq!(
            table.validate(),
            Err(ActionTableError::Empty { component: "Tally" })
        );
    }

    #[test]
    fn validate_rejects_duplicates() {
        let table = ActionTable::new("Tally")
            .action("bump", bump)
            .action("bump", bump);
        assert_eq!(
            table.validate(),
            Err(ActionTableError::Duplicate {
                component: "Tally",
                name: "bump"
            })
        );
    }

    #[test]
    fn validate_rejects_blank_names() {
        let table = ActionTable::new("Tally").action(" ", bump);
        assert!(matches!(
            table.validate(),
            Err(ActionTableError::BlankName { .. })
        ));
    }
}
