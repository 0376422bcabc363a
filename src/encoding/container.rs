use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use super::decode::Decoder;
use super::encode::Encoder;
use super::error::{DecodeError, EncodeError};
use super::registry::UserTypeRegistry;
use super::relink::{ModuleDirectory, relink};
use crate::bytecode::ir::Bytecode;
use crate::bytecode::source::SourceFileSet;

/// "EMBR"
pub const SIGNATURE: u32 = 0x454D_4252;
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = 6;

mod field {
    pub const FILE_SET: u8 = 0;
    pub const MAIN: u8 = 1;
    pub const CONSTANTS: u8 = 2;
    pub const NUM_MODULES: u8 = 3;
    pub const NUM_EMBEDS: u8 = 4;
}

impl Bytecode {
    /// Serializes the program. User values in the constant pool need
    /// [`Bytecode::encode_with`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        self.encode_with(&UserTypeRegistry::default())
    }

    pub fn encode_with(&self, registry: &UserTypeRegistry) -> Result<Vec<u8>, EncodeError> {
        let mut header = [0u8; HEADER_LEN];
        BigEndian::write_u32(&mut header[..4], SIGNATURE);
        BigEndian::write_u16(&mut header[4..], VERSION);

        let mut e = Encoder::new(registry);
        e.put(&header);

        if let Some(files) = &self.file_set {
            e.u8(field::FILE_SET);
            e.raw(&postcard::to_allocvec(files)?);
        }

        e.u8(field::MAIN);
        e.function(&self.main)?;

        if !self.constants.is_empty() {
            e.u8(field::CONSTANTS);
            e.count(self.constants.len());
            for c in &self.constants {
                e.object(c)?;
            }
        }
        if self.num_modules != 0 {
            e.u8(field::NUM_MODULES);
            e.count(self.num_modules);
        }
        if self.num_embeds != 0 {
            e.u8(field::NUM_EMBEDS);
            e.count(self.num_embeds);
        }

        let out = e.into_bytes();
        debug!(
            bytes = out.len(),
            constants = self.constants.len(),
            "bytecode encoded"
        );
        Ok(out)
    }

    /// Reads a program written by [`Bytecode::encode`].
    ///
    /// With a module directory, placeholder modules are relinked and
    /// top-level natives must end up linked. Without one the program is
    /// returned as decoded, natives unlinked.
    pub fn decode(bytes: &[u8], modules: Option<&dyn ModuleDirectory>) -> Result<Self, DecodeError> {
        Self::decode_with(bytes, modules, &UserTypeRegistry::default())
    }

    pub fn decode_with(
        bytes: &[u8],
        modules: Option<&dyn ModuleDirectory>,
        registry: &UserTypeRegistry,
    ) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::UnexpectedEof);
        }
        let signature = BigEndian::read_u32(&bytes[..4]);
        if signature != SIGNATURE {
            return Err(DecodeError::InvalidSignature(signature));
        }
        let version = BigEndian::read_u16(&bytes[4..HEADER_LEN]);
        let body = &bytes[HEADER_LEN..];

        let bc = match version {
            1 => decode_v1(Decoder::new(body, registry))?,
            v => return Err(DecodeError::UnsupportedVersion(v)),
        };

        if let Some(modules) = modules {
            relink(&bc.constants, modules)?;
        }
        debug!(
            version,
            constants = bc.constants.len(),
            modules = bc.num_modules,
            "bytecode decoded"
        );
        Ok(bc)
    }
}

fn decode_v1(mut d: Decoder<'_>) -> Result<Bytecode, DecodeError> {
    let mut bc = Bytecode::default();
    while !d.is_empty() {
        match d.u8()? {
            field::FILE_SET => {
                let files: SourceFileSet = postcard::from_bytes(d.raw()?)?;
                bc.file_set = Some(files);
            }
            field::MAIN => bc.main = Arc::new(d.function()?),
            field::CONSTANTS => {
                let n = d.count()?;
                let mut constants = Vec::with_capacity(n.min(d.remaining()));
                for _ in 0..n {
                    constants.push(d.object()?);
                }
                bc.constants = constants;
            }
            field::NUM_MODULES => bc.num_modules = d.count()?,
            field::NUM_EMBEDS => bc.num_embeds = d.count()?,
            other => return Err(DecodeError::UnknownField(other)),
        }
    }
    Ok(bc)
}
