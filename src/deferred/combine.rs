//! Fan-in combinators over deferred values

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Deferred, Origins};

fn union_origins<'a>(sets: impl IntoIterator<Item = &'a Origins>) -> Origins {
    let mut merged = BTreeSet::new();
    for set in sets {
        merged.extend(set.iter().cloned());
    }
    Arc::new(merged)
}

/// Resolve with every value (positional order) once all inputs resolve
///
/// Fails with the first failure *in settlement order* and does not wait for
/// the remaining inputs. An empty input resolves immediately.
pub fn all<T>(label: impl Into<Arc<str>>, values: Vec<Deferred<T>>) -> Deferred<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let origins = union_origins(values.iter().map(Deferred::origins));
    let combined = Deferred::with_origins(label, origins);

    if values.is_empty() {
        let _ = combined.resolve(Vec::new());
        return combined;
    }

    struct Slots<T> {
        values: Vec<Option<T>>,
        remaining: usize,
    }

    let slots = Arc::new(Mutex::new(Slots {
        values: vec![None; values.len()],
        remaining: values.len(),
    }));

    for (index, value) in values.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let target = combined.clone();
        value.on_settled(move |outcome| match outcome {
            Ok(v) => {
                let complete = {
                    let mut slots = slots.lock();
                    slots.values[index] = Some(v.clone());
                    slots.remaining -= 1;
                    if slots.remaining == 0 {
                        Some(slots.values.iter_mut().filter_map(Option::take).collect())
                    } else {
                        None
                    }
                };
                if let Some(resolved) = complete {
                    let _ = target.resolve(resolved);
                }
            }
            Err(failure) => {
                // Later failures find the value settled and are dropped
                let _ = target.fail(Arc::clone(failure));
            }
        });
    }

    combined
}

/// Heterogeneous fan-in of two values
pub fn zip<A, B>(label: impl Into<Arc<str>>, a: &Deferred<A>, b: &Deferred<B>) -> Deferred<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let origins = union_origins([a.origins(), b.origins()]);
    let combined = Deferred::with_origins(label, origins);
    let pair: Arc<Mutex<(Option<A>, Option<B>)>> = Arc::new(Mutex::new((None, None)));

    {
        let pair = Arc::clone(&pair);
        let target = combined.clone();
        a.on_settled(move |outcome| match outcome {
            Ok(v) => {
                let ready = {
                    let mut pair = pair.lock();
                    pair.0 = Some(v.clone());
                    take_pair(&mut pair)
                };
                if let Some(both) = ready {
                    let _ = target.resolve(both);
                }
            }
            Err(failure) => {
                let _ = target.fail(Arc::clone(failure));
            }
        });
    }
    {
        let target = combined.clone();
        b.on_settled(move |outcome| match outcome {
            Ok(v) => {
                let ready = {
                    let mut pair = pair.lock();
                    pair.1 = Some(v.clone());
                    take_pair(&mut pair)
                };
                if let Some(both) = ready {
                    let _ = target.resolve(both);
                }
            }
            Err(failure) => {
                let _ = target.fail(Arc::clone(failure));
            }
        });
    }

    combined
}

fn take_pair<A, B>(pair: &mut (Option<A>, Option<B>)) -> Option<(A, B)> {
    if pair.0.is_some() && pair.1.is_some() {
        pair.0.take().zip(pair.1.take())
    } else {
        None
    }
}
