//! Ordered candidate walking. Used for cover endpoints and model identifiers.
//!
//! Each candidate is attempted at most once, in order. A failure either advances to the
//! next candidate or halts the walk, depending on the caller's `advance_on` predicate.

/// A failed attempt on one candidate.
#[derive(Debug)]
pub struct Failure<C, E> {
    pub candidate: C,
    pub error: E,
}

/// Outcome of [Candidates::walk].
#[derive(Debug)]
pub enum Walk<C, T, E> {
    /// A candidate succeeded. `failures` holds the ones tried before it.
    Found {
        index: usize,
        candidate: C,
        value: T,
        failures: Vec<Failure<C, E>>,
    },
    /// A candidate failed in a way that must not be retried on the next one.
    Halted {
        failure: Failure<C, E>,
        failures: Vec<Failure<C, E>>,
    },
    /// Every candidate failed.
    Exhausted { failures: Vec<Failure<C, E>> },
}

/// Non-empty ordered list of candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates<C> {
    items: Vec<C>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Next(usize),
    Done,
}

impl<C: Clone> Candidates<C> {
    /// Returns None when `items` is empty.
    pub fn new(items: Vec<C>) -> Option<Self> {
        if items.is_empty() {
            None
        } else {
            Some(Self { items })
        }
    }

    /// Build a list that is non-empty by construction.
    pub fn with_first(first: C, rest: impl IntoIterator<Item = C>) -> Self {
        let mut items = vec![first];
        items.extend(rest);
        Self { items }
    }

    pub fn items(&self) -> &[C] {
        &self.items
    }

    /// Try candidates in order until one succeeds, the list runs out, or a failure is not
    /// accepted by `advance_on`.
    pub fn walk<T, E>(
        &self,
        mut attempt: impl FnMut(&C) -> Result<T, E>,
        advance_on: impl Fn(&E) -> bool,
    ) -> Walk<C, T, E> {
        let mut failures = Vec::new();
        let mut cursor = Cursor::Next(0);
        while let Cursor::Next(index) = cursor {
            let candidate = &self.items[index];
            match attempt(candidate) {
                Ok(value) => {
                    return Walk::Found {
                        index,
                        candidate: candidate.clone(),
                        value,
                        failures,
                    }
                }
                Err(error) => {
                    let failure = Failure {
                        candidate: candidate.clone(),
                        error,
                    };
                    if !advance_on(&failure.error) {
                        return Walk::Halted { failure, failures };
                    }
                    failures.push(failure);
                    cursor = if index + 1 < self.items.len() {
                        Cursor::Next(index + 1)
                    } else {
                        Cursor::Done
                    };
                }
            }
        }
        Walk::Exhausted { failures }
    }
}
