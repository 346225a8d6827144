//! Sequential Gauss-Seidel solve of every joint of one island.

use crate::dynamics::{IntegrationParameters, JointHandle, JointSet, RigidBodySet};

/// Drives the per-step solver protocol over the joints of one island:
/// one initialization pass, a fixed number of velocity iterations, then
/// position iterations until every joint reports convergence or the
/// iteration cap is reached.
///
/// Joints whose bodies are not all enabled are skipped entirely and
/// contribute nothing to the step. The solve is single-threaded; an
/// outer world may run one solver per island in parallel since islands
/// share no state.
#[derive(Default)]
pub struct IslandSolver {
    active: Vec<JointHandle>,
}

impl IslandSolver {
    /// Creates a new island solver.
    pub fn new() -> Self {
        Self { active: Vec::new() }
    }

    /// Runs one full solver step over `joints`. Returns `true` when the
    /// position iterations converged within the tolerances of `params`.
    pub fn solve(
        &mut self,
        params: &IntegrationParameters,
        bodies: &mut RigidBodySet,
        joints: &mut JointSet,
    ) -> bool {
        self.active.clear();
        for (handle, joint) in joints.iter() {
            if joint.is_enabled(bodies) {
                self.active.push(handle);
            }
        }

        for handle in &self.active {
            if let Some(joint) = joints.get_mut(*handle) {
                joint.initialize_constraints(params, bodies);
            }
        }

        for _ in 0..params.velocity_iterations {
            for handle in &self.active {
                if let Some(joint) = joints.get_mut(*handle) {
                    joint.solve_velocity_constraints(params, bodies);
                }
            }
        }

        let mut converged = self.active.is_empty();
        for _ in 0..params.position_iterations {
            converged = true;
            for handle in &self.active {
                if let Some(joint) = joints.get_mut(*handle) {
                    converged &= joint.solve_position_constraints(params, bodies);
                }
            }
            if converged {
                break;
            }
        }
        converged
    }
}
