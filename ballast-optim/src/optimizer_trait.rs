use crate::optimizer_state::OptimizerState;
use crate::param_group::ParamGroup;
use ballast_core::BallastError;

/// Common interface of every optimizer.
pub trait Optimizer {
    /// Performs a single optimization step over every parameter that has a
    /// gradient. Parameters without one are left untouched.
    ///
    /// A step is all-or-nothing: if it returns an error, neither parameters
    /// nor optimizer state have changed.
    fn step(&mut self) -> Result<(), BallastError>;

    /// Re-evaluates the objective through `closure`, then steps.
    ///
    /// The closure is expected to recompute gradients; its return value is
    /// passed through.
    fn step_with_closure<F>(&mut self, closure: F) -> Result<f32, BallastError>
    where
        Self: Sized,
        F: FnOnce() -> Result<f32, BallastError>,
    {
        let loss = closure()?;
        self.step()?;
        Ok(loss)
    }

    /// Drops the gradients of all managed parameters.
    fn zero_grad(&mut self);

    /// Adds a new parameter group.
    ///
    /// # Errors
    /// `ConfigurationError` if the group's overrides are invalid for this optimizer.
    fn add_param_group(&mut self, param_group: ParamGroup) -> Result<(), BallastError>;

    fn param_groups(&self) -> &[ParamGroup];

    /// Mutable access to the groups, e.g. to change a learning rate between steps.
    fn param_groups_mut(&mut self) -> &mut [ParamGroup];

    /// Snapshot of the full optimizer state.
    fn state_dict(&self) -> Result<OptimizerState, BallastError>;

    /// Restores a snapshot taken by `state_dict` on an optimizer of the same
    /// kind over parameters of the same shapes.
    ///
    /// # Errors
    /// `StateError` if the snapshot does not match this optimizer; the current
    /// state is left unchanged in that case.
    fn load_state_dict(&mut self, state_dict: &OptimizerState) -> Result<(), BallastError>;
}
