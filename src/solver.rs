//! The solver contract and the type-split combinator.

use std::collections::HashMap;
use std::sync::Arc;

use crate::challenge::{Challenge, ChallengeResponse, ChallengeType};
use crate::types::Error;

/// Releases whatever a successful [`Solver::solve`] set up. The
/// orchestrator calls it exactly once.
pub type StopFn = Box<dyn FnOnce() -> Result<(), Error> + Send>;

/// Produces responses to one or more challenges.
///
/// Implementations must be concurrency-safe. `cost` must be cheap to
/// evaluate and free of I/O side effects; its unit is caller-chosen but
/// must be consistent within one instance. If `solve` fails it must have
/// rolled back its own side effects, and no stop handle exists.
pub trait Solver: Send + Sync {
    /// The cost of solving this set of challenges together, or
    /// [`Error::Unsolvable`] if any of them cannot be solved.
    fn cost(&self, challenges: &[Challenge]) -> Result<f64, Error>;

    /// Start solving. Returns one response per challenge, in the same
    /// order, plus the stop handle that releases the solver's resources.
    fn solve(&self, challenges: &[Challenge]) -> Result<(Vec<ChallengeResponse>, StopFn), Error>;
}

/// A [`Solver`] split by challenge type.
///
/// Each challenge is assigned to the solver registered for its type. If
/// one solver instance is registered under multiple types, the
/// challenges are merged into a single call, enabling combined
/// solutions.
#[derive(Clone, Default)]
pub struct TypeSolver {
    solvers: HashMap<ChallengeType, Arc<dyn Solver>>,
}

impl TypeSolver {
    /// An empty mapping.
    pub fn new() -> TypeSolver {
        TypeSolver::default()
    }

    /// Register `solver` for challenges of type `kind`, replacing any
    /// previous registration.
    pub fn insert(&mut self, kind: ChallengeType, solver: Arc<dyn Solver>) {
        self.solvers.insert(kind, solver);
    }

    // Groups challenges by their assigned solver, remembering original
    // indices. Deterministic in the challenge order: groups appear in
    // first-seen order.
    fn assign(&self, challenges: &[Challenge]) -> Result<Vec<Assignment>, Error> {
        let mut groups: Vec<Assignment> = Vec::new();
        for (index, challenge) in challenges.iter().enumerate() {
            let solver = challenge
                .kind()
                .and_then(|kind| self.solvers.get(kind.as_str()))
                .ok_or(Error::Unsolvable)?;

            match groups
                .iter_mut()
                .find(|group| Arc::ptr_eq(&group.solver, solver))
            {
                Some(group) => {
                    group.challenges.push(challenge.clone());
                    group.indices.push(index);
                }
                None => groups.push(Assignment {
                    solver: Arc::clone(solver),
                    challenges: vec![challenge.clone()],
                    indices: vec![index],
                }),
            }
        }
        Ok(groups)
    }
}

struct Assignment {
    solver: Arc<dyn Solver>,
    challenges: Vec<Challenge>,
    indices: Vec<usize>,
}

impl Solver for TypeSolver {
    fn cost(&self, challenges: &[Challenge]) -> Result<f64, Error> {
        let mut total = 0.0;
        for group in self.assign(challenges)? {
            total += group.solver.cost(&group.challenges)?;
        }
        Ok(total)
    }

    fn solve(&self, challenges: &[Challenge]) -> Result<(Vec<ChallengeResponse>, StopFn), Error> {
        let groups = self.assign(challenges)?;

        let mut stops: Vec<StopFn> = Vec::new();
        let mut responses: Vec<Option<ChallengeResponse>> = Vec::new();
        responses.resize_with(challenges.len(), || None);

        for group in groups {
            let (group_responses, stop) = match group.solver.solve(&group.challenges) {
                Ok(solved) => solved,
                Err(err) => {
                    let _ = run_stops(stops);
                    return Err(err);
                }
            };
            stops.push(stop);

            if group_responses.len() != group.challenges.len() {
                let mismatch = Error::SolverMismatch {
                    given: group.challenges.len(),
                    returned: group_responses.len(),
                };
                let _ = run_stops(stops);
                return Err(mismatch);
            }

            // Scatter back to the caller's order.
            for (response, index) in group_responses.into_iter().zip(group.indices) {
                responses[index] = Some(response);
            }
        }

        let responses = responses
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::Str("solver assignment dropped a challenge"))?;

        let stop_all: StopFn = Box::new(move || run_stops(stops));
        Ok((responses, stop_all))
    }
}

// Invokes every stop handle, retaining the last error.
fn run_stops(stops: Vec<StopFn>) -> Result<(), Error> {
    let mut result = Ok(());
    for stop in stops {
        if let Err(err) = stop() {
            result = Err(err);
        }
    }
    result
}
