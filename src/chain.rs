use crate::delegate::Delegate;
use crate::{Error, Result};

/// A reusable recipe for a delegate chain.
///
/// Holds an ordered list of prototype links, outermost first. Each
/// [`build`](DelegateChain::build) clones the prototypes and links them
/// tail-to-head, so repeated builds yield fully independent chains.
///
/// ```
/// use delegate_function::{DelegateChain, DirectDelegate, ProcessDelegate};
///
/// let recipe = DelegateChain::new()
///     .link(ProcessDelegate::new())
///     .link(DirectDelegate::new());
/// let chain = recipe.build().unwrap();
/// assert_eq!(chain.kind_name(), "process");
/// ```
#[derive(Debug, Clone, Default)]
pub struct DelegateChain {
    links: Vec<Delegate>,
}

impl DelegateChain {
    /// Start an empty recipe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a link, outermost first.
    pub fn link(mut self, link: impl Into<Delegate>) -> Self {
        self.links.push(link.into());
        self
    }

    /// Number of links in the recipe.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the recipe has no links yet.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Build a fresh chain.
    ///
    /// Links are instantiated right to left; when an inner link is
    /// interactive, every link outside it is made interactive too, so the
    /// terminal-facing command of each boundary can reach the caller's
    /// terminal. Exactly one link of the result — the innermost — has no
    /// subdelegate.
    pub fn build(&self) -> Result<Delegate> {
        if self.links.is_empty() {
            return Err(Error::Construction("a chain needs at least one link".into()));
        }

        let mut built: Option<Delegate> = None;
        for prototype in self.links.iter().rev() {
            if prototype.subdelegate().is_some() {
                return Err(Error::Construction(format!(
                    "chain prototype `{}` already has a subdelegate; link chains \
                     through the factory instead",
                    prototype.kind_name()
                )));
            }
            let mut link = prototype.clone();
            if let Some(inner) = built.take() {
                if inner.interactive() {
                    link.core_mut().interactive = true;
                }
                link.core_mut().subdelegate = Some(Box::new(inner));
            }
            built = Some(link);
        }
        Ok(built.expect("non-empty chain built no links"))
    }

    pub(crate) fn into_links(self) -> Vec<Delegate> {
        self.links
    }

    pub(crate) fn push(&mut self, link: Delegate) {
        self.links.push(link);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe;
    use crate::{DirectDelegate, Kwargs, ProcessDelegate, SshDelegate, WorkDirDelegate};
    use serde_json::json;

    fn count_terminals(chain: &Delegate) -> usize {
        let mut n = 0;
        let mut cursor = Some(chain);
        while let Some(link) = cursor {
            if link.subdelegate().is_none() {
                n += 1;
            }
            cursor = link.subdelegate();
        }
        n
    }

    #[test]
    fn exactly_one_terminal_link() {
        let recipe = DelegateChain::new()
            .link(SshDelegate::new("deploy", "build-host"))
            .link(WorkDirDelegate::new())
            .link(ProcessDelegate::new())
            .link(DirectDelegate::new());
        let chain = recipe.build().unwrap();
        assert_eq!(count_terminals(&chain), 1);
    }

    #[test]
    fn inner_interactive_marks_all_outer_links() {
        let recipe = DelegateChain::new()
            .link(ProcessDelegate::new())
            .link(ProcessDelegate::new().interactive(true))
            .link(DirectDelegate::new());
        let chain = recipe.build().unwrap();
        assert!(chain.interactive());
        assert!(chain.subdelegate().unwrap().interactive());
        // The flag propagates outward, not inward.
        assert!(!chain
            .subdelegate()
            .unwrap()
            .subdelegate()
            .unwrap()
            .interactive());
    }

    #[test]
    fn builds_are_independent() {
        probe::register_builtins();
        let recipe = DelegateChain::new()
            .link(DirectDelegate::new())
            .link(DirectDelegate::new());
        let mut first = recipe.build().unwrap();
        let second = recipe.build().unwrap();
        let untouched = second.clone();

        let mut counter = probe::counter(0);
        first
            .invoke(&mut counter, "set_value", vec![json!(9)], Kwargs::new())
            .unwrap();
        assert_eq!(second, untouched);
    }

    #[test]
    fn empty_recipe_is_a_construction_error() {
        let err = DelegateChain::new().build().unwrap_err();
        assert!(matches!(err, Error::Construction(_)));
    }

    #[test]
    fn prelinked_prototype_is_rejected() {
        let recipe =
            DelegateChain::new().link(ProcessDelegate::new().subdelegate(DirectDelegate::new()));
        let err = recipe.build().unwrap_err();
        assert!(matches!(err, Error::Construction(_)));
    }
}
