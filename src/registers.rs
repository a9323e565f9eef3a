use crate::error::SetupError;
use log::{debug, info};
use std::{collections::HashMap, io};
#[cfg(target_os = "linux")]
use std::{fs::File, os::unix::fs::FileExt};

/// Maximum number of model-specific registers read per stamp.
pub const MAX_REGISTERS: usize = 4;

/// Reads model-specific registers by address.
pub trait RegisterReader {
    fn read(&mut self, address: u32) -> io::Result<u64>;
}

impl RegisterReader for Box<dyn RegisterReader> {
    fn read(&mut self, address: u32) -> io::Result<u64> {
        (**self).read(address)
    }
}

/// Reads MSRs of one cpu through the Linux `msr` driver (`/dev/cpu/<cpu>/msr`).
///
/// The device is opened lazily on the first read, so constructing one is free
/// even where the driver is not loaded or the process lacks privileges.
#[cfg(target_os = "linux")]
pub struct MsrReader {
    cpu: usize,
    file: Option<File>,
}

#[cfg(target_os = "linux")]
impl MsrReader {
    pub fn new(cpu: usize) -> Self {
        MsrReader { cpu, file: None }
    }

    fn file(&mut self) -> io::Result<&File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                let path = format!("/dev/cpu/{}/msr", self.cpu);
                debug!("opening {path}");
                File::open(path)?
            }
        };
        Ok(self.file.insert(file))
    }
}

#[cfg(target_os = "linux")]
impl RegisterReader for MsrReader {
    fn read(&mut self, address: u32) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.file()?.read_exact_at(&mut buf, address as u64)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// A [`RegisterReader`] returning fixed values, for tests and dry runs.
/// Addresses without a value fail to read.
#[derive(Default)]
pub struct SyntheticRegisters {
    values: HashMap<u32, u64>,
}

impl SyntheticRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: u32, value: u64) -> Self {
        self.values.insert(address, value);
        self
    }
}

impl RegisterReader for SyntheticRegisters {
    fn read(&mut self, address: u32) -> io::Result<u64> {
        self.values.get(&address).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no synthetic register {address:#x}"),
            )
        })
    }
}

/// Raw register values captured by one stamp, in registration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterValues {
    pub(crate) raw: [u64; MAX_REGISTERS],
    pub(crate) count: usize,
}

impl RegisterValues {
    /// Number of registers that were actually read.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.raw[..self.count]
    }
}

/// Validates and reads the registers requested by columns.
///
/// Registers are tested once in [`prepare`](Self::prepare): a register that cannot be read
/// at all fails the setup instead of silently producing zeros later.
pub struct RegisterManager {
    reader: Box<dyn RegisterReader>,
    addresses: Vec<u32>,
    prepared: bool,
}

impl RegisterManager {
    pub fn new(reader: Box<dyn RegisterReader>) -> Self {
        RegisterManager {
            reader,
            addresses: Vec::new(),
            prepared: false,
        }
    }

    /// Requests `address` to be read at every stamp. Registering an address twice is a no-op.
    ///
    /// Exceeding [`MAX_REGISTERS`] is only reported by [`prepare`](Self::prepare).
    pub fn add_register(&mut self, address: u32) {
        if !self.addresses.contains(&address) {
            debug!("adding register {address:#x}");
            self.addresses.push(address);
            self.prepared = false;
        }
    }

    pub fn prepare(&mut self) -> Result<(), SetupError> {
        if self.addresses.len() > MAX_REGISTERS {
            return Err(SetupError::TooManyRegisters {
                requested: self.addresses.len(),
                max: MAX_REGISTERS,
            });
        }
        for &address in &self.addresses {
            let value = self
                .reader
                .read(address)
                .map_err(|source| SetupError::RegisterRead { address, source })?;
            debug!("register {address:#x} test read: {value:#x}");
        }
        if !self.addresses.is_empty() {
            info!("register manager configured {} registers", self.addresses.len());
        }
        self.prepared = true;
        Ok(())
    }

    pub fn register_count(&self) -> usize {
        self.addresses.len()
    }

    /// Reads all registers into `dst` in registration order.
    #[inline]
    pub fn do_stamp(&mut self, dst: &mut RegisterValues) {
        if self.addresses.is_empty() {
            return;
        }
        debug_assert!(self.prepared, "registers read before prepare()");
        dst.count = 0;
        for &address in &self.addresses {
            // prepare() proved the register readable, a failure now ends this stamp's reads
            let Ok(value) = self.reader.read(address) else {
                break;
            };
            dst.raw[dst.count] = value;
            dst.count += 1;
        }
    }

    /// The raw value `values` holds for `address`.
    ///
    /// # Panics
    ///
    /// If `address` was never registered or the stamp did not get to read it.
    pub fn get_value(&self, address: u32, values: &RegisterValues) -> u64 {
        let Some(idx) = self.addresses.iter().position(|&a| a == address) else {
            panic!("register {address:#x} was never registered");
        };
        assert!(
            idx < values.count,
            "register {address:#x} was not read by this stamp ({} of {} read)",
            values.count,
            self.addresses.len()
        );
        values.raw[idx]
    }
}

/// Extracts bits `start..=stop` of `value`.
pub fn extract_bits(value: u64, start: u32, stop: u32) -> u64 {
    assert!(stop >= start, "bit range {start}..={stop} is reversed");
    assert!(stop < u64::BITS, "bit {stop} is out of range");
    let width = stop - start + 1;
    if width == u64::BITS {
        value
    } else {
        (value >> start) & ((1u64 << width) - 1)
    }
}

#[test]
fn test_extract_bits() {
    assert_eq!(extract_bits(0xFFFF_0000, 16, 31), 0xFFFF);
    assert_eq!(extract_bits(0x1234_5678_9abc_def0, 0, 63), 0x1234_5678_9abc_def0);
    assert_eq!(extract_bits(u64::MAX, 0, 63), u64::MAX);
    assert_eq!(extract_bits(0b1010, 1, 1), 1);
    assert_eq!(extract_bits(0x0000_1c00_0000_0000, 32, 47), 0x1c00);
}

#[test]
fn test_extract_bits_random_full_width() {
    use rand::Rng;
    let mut rng = rand::rng();
    for _ in 0..100 {
        let v: u64 = rng.random();
        assert_eq!(extract_bits(v, 0, 63), v);
        let start = rng.random_range(0..64);
        assert_eq!(extract_bits(v, start, 63), v >> start);
    }
}

#[test]
fn test_register_stamp_and_lookup() {
    let mut rm = RegisterManager::new(Box::new(
        SyntheticRegisters::new().with(0x198, 42).with(0x19c, 7),
    ));
    rm.add_register(0x198);
    rm.add_register(0x19c);
    rm.add_register(0x198);
    rm.prepare().unwrap();
    assert_eq!(rm.register_count(), 2);
    let mut values = RegisterValues::default();
    rm.do_stamp(&mut values);
    assert_eq!(values.as_slice(), &[42, 7]);
    assert_eq!(rm.get_value(0x19c, &values), 7);
}

#[test]
fn test_register_fail_fast() {
    let mut rm = RegisterManager::new(Box::new(SyntheticRegisters::new().with(0x198, 1)));
    rm.add_register(0x198);
    rm.add_register(0x611);
    match rm.prepare() {
        Err(SetupError::RegisterRead { address, .. }) => assert_eq!(address, 0x611),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_too_many_registers() {
    let mut reader = SyntheticRegisters::new();
    for a in 0..=MAX_REGISTERS as u32 {
        reader = reader.with(a, 0);
    }
    let mut rm = RegisterManager::new(Box::new(reader));
    for a in 0..=MAX_REGISTERS as u32 {
        rm.add_register(a);
    }
    assert!(matches!(
        rm.prepare(),
        Err(SetupError::TooManyRegisters { requested: 5, max: 4 })
    ));
}

#[test]
#[should_panic(expected = "was not read")]
fn test_value_past_read_count_faults() {
    let mut rm = RegisterManager::new(Box::new(SyntheticRegisters::new().with(0x198, 1)));
    rm.add_register(0x198);
    rm.prepare().unwrap();
    rm.get_value(0x198, &RegisterValues::default());
}

#[test]
#[should_panic(expected = "never registered")]
fn test_unregistered_register_faults() {
    let rm = RegisterManager::new(Box::new(SyntheticRegisters::new()));
    rm.get_value(0x198, &RegisterValues::default());
}
