//! Fan-out of one sequence to several independent readers.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct Shared<T> {
    source: Box<dyn Iterator<Item = T> + Send>,
    /// Items some live cursor has not read yet.
    buffer: VecDeque<T>,
    /// Absolute index of `buffer[0]`.
    base: usize,
    /// Next absolute index per subscriber; `None` once dropped.
    cursors: Vec<Option<usize>>,
    exhausted: bool,
}

impl<T> Shared<T> {
    /// Drop items every live cursor has passed.
    fn trim(&mut self) {
        let end = self.base + self.buffer.len();
        let min = self.cursors.iter().flatten().copied().min().unwrap_or(end);
        while self.base < min && self.buffer.pop_front().is_some() {
            self.base += 1;
        }
    }
}

/// One reader of a [`tee`].
///
/// Every subscriber sees every item of the source in order, at its own
/// pace. The source is pulled lazily by whichever subscriber runs ahead.
pub struct Subscriber<T> {
    shared: Arc<Mutex<Shared<T>>>,
    id: usize,
}

/// Split `source` into `n` subscribers.
pub fn tee<T, I>(source: I, n: usize) -> Vec<Subscriber<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let shared = Arc::new(Mutex::new(Shared {
        source: Box::new(source.into_iter()),
        buffer: VecDeque::new(),
        base: 0,
        cursors: vec![Some(0); n],
        exhausted: false,
    }));
    (0..n)
        .map(|id| Subscriber {
            shared: shared.clone(),
            id,
        })
        .collect()
}

impl<T: Clone> Iterator for Subscriber<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let mut shared = self.shared.lock();
        let pos = shared.cursors[self.id]?;

        let item = if pos < shared.base + shared.buffer.len() {
            shared.buffer[pos - shared.base].clone()
        } else if shared.exhausted {
            return None;
        } else {
            match shared.source.next() {
                Some(item) => {
                    shared.buffer.push_back(item.clone());
                    item
                }
                None => {
                    shared.exhausted = true;
                    return None;
                }
            }
        };

        shared.cursors[self.id] = Some(pos + 1);
        shared.trim();
        Some(item)
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        shared.cursors[self.id] = None;
        shared.trim();
    }
}
