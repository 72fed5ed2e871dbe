#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![warn(missing_docs)]

//! Model-fitting driver for `dustrt` simulations: a parameterized
//! template simulation is run repeatedly over the master-slave task
//! farm, its synthetic frames are compared against reference images,
//! and a genetic algorithm searches the parameter space.

pub mod adjustable;
pub mod config;
pub mod ga;
pub mod objective;
pub mod scheme;
