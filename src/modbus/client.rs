use log::{debug, warn};

use super::protocol::{
    decode_read_response, encode_read_request, exception_code, frame_transaction_id,
    READ_HOLDING_REGISTERS, SINGLE_REGISTER_RESPONSE_LEN,
};
use super::session::ModbusTransport;
use crate::utils::error::ModbusError;

pub const DEFAULT_UNIT_ID: u8 = 1;

/// Late replies to earlier, timed-out requests tolerated before giving up.
const MAX_STALE_REPLIES: usize = 2;

/// Reads one holding register per request/response cycle.
#[derive(Debug, Clone, Copy)]
pub struct RegisterReader {
    unit_id: u8,
}

impl RegisterReader {
    pub fn new(unit_id: u8) -> Self {
        Self { unit_id }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub async fn try_read_register<T>(&self, transport: &mut T, address: u16) -> Result<i16, ModbusError>
    where
        T: ModbusTransport + ?Sized,
    {
        let transaction_id = transport.next_transaction_id();
        let request = encode_read_request(transaction_id, self.unit_id, address, 1);

        let mut response = transport
            .send_and_receive(&request, SINGLE_REGISTER_RESPONSE_LEN)
            .await?;

        let mut skipped = 0;
        while let Some(received) = frame_transaction_id(&response).filter(|&id| id != transaction_id) {
            if skipped == MAX_STALE_REPLIES {
                return Err(ModbusError::TransactionMismatch { sent: transaction_id, received });
            }
            warn!(
                "Skipping stale reply for register {}: sent {}, received {}",
                address, transaction_id, received
            );
            skipped += 1;
            response = transport.receive(SINGLE_REGISTER_RESPONSE_LEN).await?;
        }

        if let Some(code) = exception_code(&response) {
            warn!("Device rejected read of register {} with exception code {}", address, code);
            return Err(ModbusError::ProtocolMismatch {
                function_code: READ_HOLDING_REGISTERS | 0x80,
            });
        }

        let decoded = decode_read_response(&response)?;
        debug!("Register {} = {}", address, decoded.value);
        Ok(decoded.value)
    }

    /// Uniform "read failed" outcome; the cause is only logged.
    pub async fn read_register<T>(&self, transport: &mut T, address: u16) -> Option<i16>
    where
        T: ModbusTransport + ?Sized,
    {
        match self.try_read_register(transport, address).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("⚠️  Failed to read register {}: {}", address, e);
                None
            }
        }
    }
}

impl Default for RegisterReader {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_ID)
    }
}
