//! Standing propagation of trait values between models.

use std::cell::Cell;
use std::rc::Rc;

use tracing::trace;

use crate::model::{Model, ObserverId, WeakModel};
use crate::traits::{TraitError, TraitName};

/// One observer installed by a link.
#[derive(Clone)]
struct Half {
    model: WeakModel,
    observer: ObserverId,
}

/// A live link between two traits, created by [`dlink`] or [`link`].
///
/// Dropping the handle keeps the link alive; call [`Link::unlink`] to remove
/// it.
#[derive(Clone)]
pub struct Link {
    halves: Vec<Half>,
}

impl Link {
    /// Removes the observers installed by the link.
    pub fn unlink(&self) {
        for half in &self.halves {
            if let Some(model) = half.model.upgrade() {
                model.unobserve(half.observer);
            }
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field(
                "observers",
                &self.halves.iter().map(|h| h.observer).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn forward(
    source: &Model,
    source_name: &str,
    target: &Model,
    target_name: &str,
    busy: Option<Rc<Cell<bool>>>,
) -> Result<Half, TraitError> {
    let weak_target = target.downgrade();
    let target_name: TraitName = target_name.into();
    let source_class: TraitName = source.class().name().into();
    let observer = source.observe(source_name, move |change| {
        let Some(target) = weak_target.upgrade() else {
            return Ok(());
        };
        if let Some(busy) = &busy {
            if busy.get() {
                return Ok(());
            }
            busy.set(true);
        }
        trace!(
            source = %source_class,
            target = target.class().name(),
            name = %target_name,
            "propagating linked value"
        );
        let result = target.set(&target_name, change.new.clone());
        if let Some(busy) = &busy {
            busy.set(false);
        }
        result.map(|_| ())
    })?;
    Ok(Half {
        model: source.downgrade(),
        observer,
    })
}

/// Links `source` one way to `target`.
///
/// The target immediately takes the source's current value and then follows
/// every subsequent change of the source.
pub fn dlink(source: (&Model, &str), target: (&Model, &str)) -> Result<Link, TraitError> {
    let (source, source_name) = source;
    let (target, target_name) = target;
    target.set(target_name, source.get(source_name)?)?;
    let half = forward(source, source_name, target, target_name, None)?;
    Ok(Link { halves: vec![half] })
}

/// Links two traits both ways.
///
/// The second trait immediately takes the first's current value. A change
/// on either side is propagated to the other without being echoed back.
pub fn link(first: (&Model, &str), second: (&Model, &str)) -> Result<Link, TraitError> {
    let (a, a_name) = first;
    let (b, b_name) = second;
    b.set(b_name, a.get(a_name)?)?;
    let busy = Rc::new(Cell::new(false));
    let forward_half = forward(a, a_name, b, b_name, Some(busy.clone()))?;
    let backward_half = forward(b, b_name, a, a_name, Some(busy))?;
    Ok(Link {
        halves: vec![forward_half, backward_half],
    })
}
