//! Master-slave task farm.
//!
//! A task is a pure function from a value envelope to a value envelope.
//! Tasks are registered with the manager before slaves are acquired and
//! receive stable integer indices starting at zero. The manager
//! dispatches a vector of inputs over either a private local worker pool
//! or, when the message layer reports more than one participant, over
//! the remote slaves; outputs always come back in input order.

use crate::comm::MessageLayer;
use crate::error::{Error, Result};
use crate::parallel::ParallelFactory;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// Default maximum size in bytes of a serialized envelope.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4000;

/// A tagged value capable of carrying scalars, numeric arrays and
/// nested homogeneous lists across the farm boundary.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Value {
    /// The absent value.
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// An integer scalar.
    Int(i64),
    /// A floating point scalar.
    Double(f64),
    /// A text value.
    Text(String),
    /// A packed array of floating point values.
    DoubleVec(Vec<f64>),
    /// A nested list of values.
    List(Vec<Value>),
}

impl Value {
    /// Serializes the envelope into a byte buffer whose length must not
    /// exceed `max_size`.
    ///
    /// # Errors
    ///
    /// Returns a fatal farm error when the serialized form exceeds the
    /// configured maximum.
    pub fn to_bytes(&self, max_size: usize) -> Result<Vec<u8>> {
        let buffer = bincode::serialize(self)
            .map_err(|err| Error::Farm(format!("cannot serialize envelope: {err}")))?;
        if buffer.len() > max_size {
            return Err(Error::Farm(format!(
                "message size {} larger than maximum size {max_size}",
                buffer.len()
            )));
        }
        Ok(buffer)
    }

    /// Resurrects an envelope from a byte buffer. Any failure is fatal
    /// at the receiving end.
    ///
    /// # Errors
    ///
    /// Returns a fatal farm error when the bytes do not describe a valid
    /// envelope.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        bincode::deserialize(buffer)
            .map_err(|err| Error::Farm(format!("cannot deserialize envelope: {err}")))
    }

    /// Returns the floating point scalar, or zero for other variants.
    #[must_use]
    pub fn to_double(&self) -> f64 {
        match self {
            Self::Double(value) => *value,
            Self::Int(value) => *value as f64,
            _ => 0.0,
        }
    }

    /// Returns the integer scalar, or zero for other variants.
    #[must_use]
    pub const fn to_int(&self) -> i64 {
        match self {
            Self::Int(value) => *value,
            _ => 0,
        }
    }

    /// Returns the packed double array, or an empty slice for other
    /// variants.
    #[must_use]
    pub fn as_doubles(&self) -> &[f64] {
        match self {
            Self::DoubleVec(values) => values,
            _ => &[],
        }
    }
}

/// A pure function taking a value envelope to a value envelope,
/// performed by the farm in parallel with other instances of itself.
pub trait Task: Send + Sync {
    /// Performs the task on a single input.
    ///
    /// # Errors
    ///
    /// A task error aborts the whole `perform_task` call.
    fn perform(&self, input: Value) -> Result<Value>;
}

impl<F> Task for F
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn perform(&self, input: Value) -> Result<Value> {
        self(input)
    }
}

/// Performs a set of similar tasks in parallel in a local (shared
/// memory) or remote (distributed memory) context through a single
/// master - multiple slaves paradigm.
///
/// With the exception of the status queries, all functions must be
/// invoked from the thread that constructed the manager; a fatal error
/// is thrown when this restriction is violated.
pub struct MasterSlaveManager {
    tasks: Vec<Box<dyn Task>>,
    acquired: bool,
    performing: bool,
    local_slave_count: usize,
    max_message_size: usize,
    layer: Option<Arc<MessageLayer>>,
    factory: Option<ParallelFactory>,
    owner: ThreadId,
}

impl MasterSlaveManager {
    /// Constructs a manager operating in local mode with as many slaves
    /// as logical cores.
    #[must_use]
    pub fn new() -> Self {
        Self::with_layer(None)
    }

    /// Constructs a manager that operates remotely when the given
    /// message layer reports more than one participant, and locally
    /// otherwise.
    #[must_use]
    pub fn with_layer(layer: Option<Arc<MessageLayer>>) -> Self {
        let remote = layer.as_ref().is_some_and(|layer| layer.size() > 1);
        Self {
            tasks: Vec::new(),
            acquired: false,
            performing: false,
            local_slave_count: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            layer: if remote { layer } else { None },
            factory: None,
            owner: std::thread::current().id(),
        }
    }

    fn check_thread(&self) -> Result<()> {
        if std::thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::fatal(
                "Must be invoked from the thread that constructed the manager",
            ))
        }
    }

    const fn remote(&self) -> bool {
        self.layer.is_some()
    }

    /// Returns true if the caller is the master.
    #[must_use]
    pub fn is_master(&self) -> bool {
        !self.is_slave()
    }

    /// Returns true if the caller is a slave.
    #[must_use]
    pub fn is_slave(&self) -> bool {
        self.performing
            || self
                .layer
                .as_ref()
                .is_some_and(|layer| layer.rank() != 0)
    }

    /// Sets the number of slaves used in local mode; ignored in remote
    /// mode.
    ///
    /// # Errors
    ///
    /// Fatal when slaves are already acquired.
    pub fn set_local_slave_count(&mut self, count: usize) -> Result<()> {
        if self.acquired {
            return Err(Error::fatal("Slaves are already acquired"));
        }
        self.local_slave_count = count;
        Ok(())
    }

    /// Sets the maximum size in bytes of a message exchanged between
    /// master and slave in remote mode. The size must accommodate the
    /// serialized form of every envelope passed to or returned from a
    /// registered task.
    ///
    /// # Errors
    ///
    /// Fatal when slaves are already acquired.
    pub fn set_max_message_size(&mut self, size: usize) -> Result<()> {
        if self.acquired {
            return Err(Error::fatal("Slaves are already acquired"));
        }
        self.max_message_size = size;
        Ok(())
    }

    /// Returns the maximum message size in bytes.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Registers a task and returns its index. Task indices are assigned
    /// in increasing order starting from zero.
    ///
    /// # Errors
    ///
    /// Fatal when slaves are already acquired.
    pub fn register_task(&mut self, task: Box<dyn Task>) -> Result<usize> {
        if self.acquired {
            return Err(Error::fatal("Slaves are already acquired"));
        }
        self.tasks.push(task);
        Ok(self.tasks.len() - 1)
    }

    /// Returns the number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Ensures that master and slaves are ready to command and perform
    /// tasks. On a remote slave this function blocks in the obey loop
    /// until the master releases the slaves.
    ///
    /// # Errors
    ///
    /// Fatal when slaves are already acquired or on a wire failure.
    pub fn acquire_slaves(&mut self) -> Result<()> {
        self.check_thread()?;
        if self.acquired {
            return Err(Error::fatal("Slaves are already acquired"));
        }
        self.acquired = true;
        if self.remote() {
            if self.is_slave() {
                self.slave_obey_loop()?;
                self.acquired = false;
            }
        } else {
            // the private pool used for local parallelization
            self.factory = Some(ParallelFactory::new(self.local_slave_count)?);
        }
        Ok(())
    }

    /// Releases the slaves. Does nothing when the slaves are not
    /// acquired or when called from a slave.
    ///
    /// # Errors
    ///
    /// Fatal when tasks are still being performed.
    pub fn release_slaves(&mut self) -> Result<()> {
        self.check_thread()?;
        if self.performing {
            return Err(Error::fatal("Still performing tasks"));
        }
        if self.remote() && self.acquired && self.is_master() {
            self.stop_obeying()?;
        }
        self.acquired = false;
        self.factory = None;
        Ok(())
    }

    /// Makes the slaves perform the task with the given index on each of
    /// the inputs in parallel. The outputs are returned in the same
    /// order as the inputs, regardless of the slave that produced each
    /// one.
    ///
    /// # Errors
    ///
    /// Fatal when called while already performing, from a slave, from
    /// the wrong thread, or with an out-of-range task index.
    pub fn perform_task(&mut self, task_index: usize, inputs: Vec<Value>) -> Result<Vec<Value>> {
        self.check_thread()?;
        if self.performing {
            return Err(Error::fatal("Already performing tasks"));
        }
        if self.is_slave() {
            return Err(Error::fatal("Only the master can command the slaves"));
        }
        if task_index >= self.tasks.len() {
            return Err(Error::fatal("Task index out of range"));
        }

        self.performing = true;
        let result = if self.remote() {
            self.master_command_loop(task_index, inputs)
        } else {
            self.perform_locally(task_index, inputs)
        };
        self.performing = false;
        result
    }

    /// Makes the slaves perform the task with index zero on each of the
    /// inputs.
    ///
    /// # Errors
    ///
    /// See [`Self::perform_task`].
    pub fn perform(&mut self, inputs: Vec<Value>) -> Result<Vec<Value>> {
        self.perform_task(0, inputs)
    }

    fn perform_locally(&self, task_index: usize, inputs: Vec<Value>) -> Result<Vec<Value>> {
        let fallback;
        let factory = match &self.factory {
            Some(factory) => factory,
            None => {
                fallback = ParallelFactory::new(self.local_slave_count)?;
                &fallback
            }
        };
        let task = &self.tasks[task_index];
        let outputs: Mutex<Vec<Option<Value>>> = Mutex::new(vec![None; inputs.len()]);
        factory.try_ranges(inputs.len(), |_, range| {
            for index in range {
                let output = task.perform(inputs[index].clone())?;
                outputs.lock().expect("output mutex")[index] = Some(output);
            }
            Ok(())
        })?;
        Ok(outputs
            .into_inner()
            .expect("output mutex")
            .into_iter()
            .map(|output| output.expect("worker filled every slot"))
            .collect())
    }

    fn master_command_loop(&self, task_index: usize, inputs: Vec<Value>) -> Result<Vec<Value>> {
        let layer = self.layer.as_ref().expect("remote mode has a layer");
        let tag = i32::try_from(task_index).expect("small task index");
        let num_items = inputs.len();
        let mut outputs: Vec<Option<Value>> = vec![None; num_items];

        // remember the index of the most recent item handed to each slave
        let mut item_for_slave = vec![0usize; layer.size()];
        let mut num_sent = 0;

        // hand out an item to each slave, unless there are fewer items
        // than slaves
        for slave in 1..layer.size() {
            if num_sent >= num_items {
                break;
            }
            let buffer = inputs[num_sent].to_bytes(self.max_message_size)?;
            layer.send(slave, tag, &buffer)?;
            item_for_slave[slave] = num_sent;
            num_sent += 1;
        }

        // receive results, handing out more items until all are done
        for _ in 0..num_items {
            let message = layer.receive_any()?;
            outputs[item_for_slave[message.source]] = Some(Value::from_bytes(&message.payload)?);
            if num_sent < num_items {
                let buffer = inputs[num_sent].to_bytes(self.max_message_size)?;
                layer.send(message.source, tag, &buffer)?;
                item_for_slave[message.source] = num_sent;
                num_sent += 1;
            }
        }

        Ok(outputs
            .into_iter()
            .map(|output| output.expect("every item was answered"))
            .collect())
    }

    fn slave_obey_loop(&self) -> Result<()> {
        let layer = self.layer.as_ref().expect("remote mode has a layer");
        loop {
            let (tag, payload) = layer.receive_from_master()?;
            // a tag that specifies a non-existing task terminates the loop
            let Ok(task_index) = usize::try_from(tag) else {
                break;
            };
            if task_index >= self.tasks.len() {
                break;
            }
            let input = Value::from_bytes(&payload)?;
            let output = self.tasks[task_index].perform(input)?;
            layer.send(0, tag, &output.to_bytes(self.max_message_size)?)?;
        }
        Ok(())
    }

    fn stop_obeying(&self) -> Result<()> {
        let layer = self.layer.as_ref().expect("remote mode has a layer");
        // an empty message with a tag beyond the registered tasks
        let sentinel = i32::try_from(self.tasks.len()).expect("small task count");
        for slave in 1..layer.size() {
            layer.send(slave, sentinel, &[])?;
        }
        Ok(())
    }
}

impl Default for MasterSlaveManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn square_task() -> Box<dyn Task> {
        Box::new(|input: Value| Ok(Value::Double(input.to_double() * input.to_double())))
    }

    fn identity_task() -> Box<dyn Task> {
        Box::new(|input: Value| Ok(input))
    }

    #[test]
    fn envelope_round_trips_through_bytes() {
        let value = Value::List(vec![
            Value::Int(3),
            Value::Double(0.5),
            Value::Text("label".to_owned()),
            Value::DoubleVec(vec![1.0, 2.0, 3.0]),
            Value::Null,
        ]);
        let bytes = value.to_bytes(DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(Value::from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn oversize_envelope_is_fatal() {
        let value = Value::DoubleVec(vec![0.0; 10_000]);
        assert!(value.to_bytes(DEFAULT_MAX_MESSAGE_SIZE).is_err());
    }

    #[test]
    fn malformed_bytes_are_fatal() {
        assert!(Value::from_bytes(&[0xff; 3]).is_err());
    }

    #[test]
    fn local_square_preserves_input_order() {
        let mut manager = MasterSlaveManager::new();
        manager.set_local_slave_count(3).unwrap();
        manager.register_task(square_task()).unwrap();
        manager.acquire_slaves().unwrap();

        let inputs: Vec<Value> = (0..8).map(|i| Value::Double(f64::from(i))).collect();
        let outputs = manager.perform_task(0, inputs).unwrap();
        let squares: Vec<f64> = outputs.iter().map(Value::to_double).collect();
        assert_eq!(squares, vec![0.0, 1.0, 4.0, 9.0, 16.0, 25.0, 36.0, 49.0]);

        manager.release_slaves().unwrap();
    }

    #[test]
    fn local_identity_round_trips_any_size() {
        for n in [1usize, 2, 7, 40] {
            let mut manager = MasterSlaveManager::new();
            manager.set_local_slave_count(4).unwrap();
            manager.register_task(identity_task()).unwrap();
            manager.acquire_slaves().unwrap();
            let inputs: Vec<Value> = (0..n).map(|i| Value::Int(i as i64)).collect();
            let outputs = manager.perform_task(0, inputs.clone()).unwrap();
            assert_eq!(outputs, inputs);
            manager.release_slaves().unwrap();
        }
    }

    #[test]
    fn misuse_is_fatal() {
        let mut manager = MasterSlaveManager::new();
        manager.register_task(identity_task()).unwrap();
        manager.acquire_slaves().unwrap();
        // acquiring twice
        assert!(manager.acquire_slaves().is_err());
        // registering after acquisition
        assert!(manager.register_task(identity_task()).is_err());
        // out of range task index
        assert!(manager.perform_task(5, vec![]).is_err());
        manager.release_slaves().unwrap();
    }

    #[test]
    fn foreign_thread_invocation_is_fatal() {
        let manager = std::sync::Mutex::new(MasterSlaveManager::new());
        manager
            .lock()
            .unwrap()
            .register_task(identity_task())
            .unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let result = manager.lock().unwrap().acquire_slaves();
                assert!(result.is_err());
            });
        });
    }

    #[test]
    fn remote_square_with_three_slaves() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let size = 4;
        let mut slaves = Vec::new();
        for rank in 1..size {
            let address = address.clone();
            slaves.push(std::thread::spawn(move || {
                let layer = MessageLayer::connect(rank, size, &address).unwrap();
                let mut manager = MasterSlaveManager::with_layer(Some(layer));
                manager.register_task(square_task()).unwrap();
                assert!(manager.is_slave());
                // blocks in the obey loop until released by the master
                manager.acquire_slaves().unwrap();
            }));
        }

        let layer = MessageLayer::connect(0, size, &address).unwrap();
        let mut manager = MasterSlaveManager::with_layer(Some(layer));
        manager.register_task(square_task()).unwrap();
        assert!(manager.is_master());
        manager.acquire_slaves().unwrap();

        let inputs: Vec<Value> = (0..8).map(|i| Value::Double(f64::from(i))).collect();
        let outputs = manager.perform_task(0, inputs).unwrap();
        let squares: Vec<f64> = outputs.iter().map(Value::to_double).collect();
        assert_eq!(squares, vec![0.0, 1.0, 4.0, 9.0, 16.0, 25.0, 36.0, 49.0]);

        manager.release_slaves().unwrap();
        for slave in slaves {
            slave.join().unwrap();
        }
    }
}
