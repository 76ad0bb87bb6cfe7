// Error type matching for skip and retry classification

use std::error::Error;
use std::fmt;
use std::sync::Arc;

type Matcher = dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync;

/// Matches an error when any error in its `source()` chain satisfies the test.
///
/// The usual form is [`ErrorMatcher::of`], which matches a concrete error
/// type, so wrapping a business error in another error does not change how
/// it is classified.
#[derive(Clone)]
pub struct ErrorMatcher {
    name: String,
    test: Arc<Matcher>,
}

impl ErrorMatcher {
    /// Match errors of concrete type `E`
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>().to_string(),
            test: Arc::new(|err: &(dyn Error + 'static)| err.is::<E>()),
        }
    }

    /// Match every error
    pub fn any() -> Self {
        Self::predicate("any", |_| true)
    }

    pub fn predicate(
        name: impl Into<String>,
        test: impl Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            test: Arc::new(test),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, error: &(dyn Error + 'static)) -> bool {
        let mut current = Some(error);
        while let Some(err) = current {
            if (self.test)(err) {
                return true;
            }
            current = err.source();
        }
        false
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorMatcher").field(&self.name).finish()
    }
}

/// True when any matcher matches
pub fn matches_any(matchers: &[ErrorMatcher], error: &(dyn Error + 'static)) -> bool {
    matchers.iter().any(|m| m.matches(error))
}

/// Routes an error to the value registered for the first matching matcher
pub struct ErrorClassifier<T> {
    routes: Vec<(ErrorMatcher, T)>,
    fallback: T,
}

impl<T> ErrorClassifier<T> {
    pub fn new(fallback: T) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    pub fn route(mut self, matcher: ErrorMatcher, value: T) -> Self {
        self.routes.push((matcher, value));
        self
    }

    pub fn classify(&self, error: &(dyn Error + 'static)) -> &T {
        self.routes
            .iter()
            .find(|(matcher, _)| matcher.matches(error))
            .map(|(_, value)| value)
            .unwrap_or(&self.fallback)
    }
}
