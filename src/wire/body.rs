//! Message bodies (spec §6). Each body type provides `encode`/`decode`; the
//! round trip is the identity for every defined body (spec §8).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

use crate::error::{CoreError, ErrorKind};

type Result<T> = std::result::Result<T, CoreError>;

fn truncated(what: &str) -> CoreError {
    CoreError::new_local(ErrorKind::ProtocolViolation, format!("body truncated: {what}"))
}

fn io_to_core(what: &str) -> impl Fn(io::Error) -> CoreError + '_ {
    move |_e| truncated(what)
}

/// `TX_REQUEST` body.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequestBody {
    pub device_id: u32,
    pub phy_id: u32,
    pub tx_power_pw: u64,
    pub payload: Vec<u8>,
    pub tx_vector: Vec<u8>,
}

impl TxRequestBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.device_id)?;
        out.write_u32::<BigEndian>(self.phy_id)?;
        out.write_u64::<BigEndian>(self.tx_power_pw)?;
        out.write_u32::<BigEndian>(self.payload.len() as u32)?;
        out.write_u32::<BigEndian>(self.tx_vector.len() as u32)?;
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.tx_vector);
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let device_id = cur.read_u32::<BigEndian>().map_err(io_to_core("device_id"))?;
        let phy_id = cur.read_u32::<BigEndian>().map_err(io_to_core("phy_id"))?;
        let tx_power_pw = cur.read_u64::<BigEndian>().map_err(io_to_core("tx_power_pw"))?;
        let payload_len = cur.read_u32::<BigEndian>().map_err(io_to_core("payload_len"))? as usize;
        let tx_vector_len = cur.read_u32::<BigEndian>().map_err(io_to_core("tx_vector_len"))? as usize;
        let mut payload = vec![0u8; payload_len];
        cur.read_exact(&mut payload).map_err(io_to_core("payload"))?;
        let mut tx_vector = vec![0u8; tx_vector_len];
        cur.read_exact(&mut tx_vector).map_err(io_to_core("tx_vector"))?;
        Ok(TxRequestBody { device_id, phy_id, tx_power_pw, payload, tx_vector })
    }
}

/// `RX_NOTIFICATION` body.
#[derive(Debug, Clone, PartialEq)]
pub struct RxNotificationBody {
    pub receiver_device_id: u32,
    pub transmitter_device_id: u32,
    pub phy_id: u32,
    pub rx_power_pw: u64,
    pub rx_power_dbm: f64,
    pub path_loss_db: f64,
    pub distance_m: f64,
    pub frequency_hz: u32,
    pub propagation_delay_ns: u64,
    pub tx_timestamp_ns: u64,
    pub payload: Vec<u8>,
}

impl RxNotificationBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.receiver_device_id)?;
        out.write_u32::<BigEndian>(self.transmitter_device_id)?;
        out.write_u32::<BigEndian>(self.phy_id)?;
        out.write_u64::<BigEndian>(self.rx_power_pw)?;
        out.write_f64::<BigEndian>(self.rx_power_dbm)?;
        out.write_f64::<BigEndian>(self.path_loss_db)?;
        out.write_f64::<BigEndian>(self.distance_m)?;
        out.write_u32::<BigEndian>(self.frequency_hz)?;
        out.write_u64::<BigEndian>(self.propagation_delay_ns)?;
        out.write_u32::<BigEndian>(self.payload.len() as u32)?;
        out.write_u64::<BigEndian>(self.tx_timestamp_ns)?;
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let receiver_device_id = cur.read_u32::<BigEndian>().map_err(io_to_core("receiver_device_id"))?;
        let transmitter_device_id = cur.read_u32::<BigEndian>().map_err(io_to_core("transmitter_device_id"))?;
        let phy_id = cur.read_u32::<BigEndian>().map_err(io_to_core("phy_id"))?;
        let rx_power_pw = cur.read_u64::<BigEndian>().map_err(io_to_core("rx_power_pw"))?;
        let rx_power_dbm = cur.read_f64::<BigEndian>().map_err(io_to_core("rx_power_dbm"))?;
        let path_loss_db = cur.read_f64::<BigEndian>().map_err(io_to_core("path_loss_db"))?;
        let distance_m = cur.read_f64::<BigEndian>().map_err(io_to_core("distance_m"))?;
        let frequency_hz = cur.read_u32::<BigEndian>().map_err(io_to_core("frequency_hz"))?;
        let propagation_delay_ns = cur.read_u64::<BigEndian>().map_err(io_to_core("propagation_delay_ns"))?;
        let payload_len = cur.read_u32::<BigEndian>().map_err(io_to_core("payload_len"))? as usize;
        let tx_timestamp_ns = cur.read_u64::<BigEndian>().map_err(io_to_core("tx_timestamp_ns"))?;
        let mut payload = vec![0u8; payload_len];
        cur.read_exact(&mut payload).map_err(io_to_core("payload"))?;
        Ok(RxNotificationBody {
            receiver_device_id,
            transmitter_device_id,
            phy_id,
            rx_power_pw,
            rx_power_dbm,
            path_loss_db,
            distance_m,
            frequency_hz,
            propagation_delay_ns,
            tx_timestamp_ns,
            payload,
        })
    }
}

/// `DEVICE_REGISTER` body.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRegisterBody {
    pub phy_id: u32,
    pub phy_type: u32,
    pub channel_number: u32,
    pub channel_width_mhz: u32,
    pub node_id: u32,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
}

impl DeviceRegisterBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.phy_id)?;
        out.write_u32::<BigEndian>(self.phy_type)?;
        out.write_u32::<BigEndian>(self.channel_number)?;
        out.write_u32::<BigEndian>(self.channel_width_mhz)?;
        out.write_u32::<BigEndian>(self.node_id)?;
        out.write_f64::<BigEndian>(self.pos_x)?;
        out.write_f64::<BigEndian>(self.pos_y)?;
        out.write_f64::<BigEndian>(self.pos_z)?;
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(DeviceRegisterBody {
            phy_id: cur.read_u32::<BigEndian>().map_err(io_to_core("phy_id"))?,
            phy_type: cur.read_u32::<BigEndian>().map_err(io_to_core("phy_type"))?,
            channel_number: cur.read_u32::<BigEndian>().map_err(io_to_core("channel_number"))?,
            channel_width_mhz: cur.read_u32::<BigEndian>().map_err(io_to_core("channel_width_mhz"))?,
            node_id: cur.read_u32::<BigEndian>().map_err(io_to_core("node_id"))?,
            pos_x: cur.read_f64::<BigEndian>().map_err(io_to_core("pos_x"))?,
            pos_y: cur.read_f64::<BigEndian>().map_err(io_to_core("pos_y"))?,
            pos_z: cur.read_f64::<BigEndian>().map_err(io_to_core("pos_z"))?,
        })
    }
}

/// `POSITION_UPDATE` body.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdateBody {
    pub device_id: u32,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub velocity: f64,
    pub heading: f64,
}

impl PositionUpdateBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.device_id)?;
        out.write_f64::<BigEndian>(self.pos_x)?;
        out.write_f64::<BigEndian>(self.pos_y)?;
        out.write_f64::<BigEndian>(self.pos_z)?;
        out.write_f64::<BigEndian>(self.velocity)?;
        out.write_f64::<BigEndian>(self.heading)?;
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(PositionUpdateBody {
            device_id: cur.read_u32::<BigEndian>().map_err(io_to_core("device_id"))?,
            pos_x: cur.read_f64::<BigEndian>().map_err(io_to_core("pos_x"))?,
            pos_y: cur.read_f64::<BigEndian>().map_err(io_to_core("pos_y"))?,
            pos_z: cur.read_f64::<BigEndian>().map_err(io_to_core("pos_z"))?,
            velocity: cur.read_f64::<BigEndian>().map_err(io_to_core("velocity"))?,
            heading: cur.read_f64::<BigEndian>().map_err(io_to_core("heading"))?,
        })
    }
}

/// `CONFIG_LOSS_MODEL` / `CONFIG_DELAY_MODEL` body. The parameter blob is
/// opaque to the core (spec §4.4, §9): the engine only ever sees it through
/// the `type tag + serialized parameters` capability interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBody {
    pub config_type: ConfigType,
    pub model_type_hash: u32,
    pub params: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    Delay = 0,
    Loss = 1,
}

impl ConfigBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.config_type as u32)?;
        out.write_u32::<BigEndian>(self.model_type_hash)?;
        out.write_u32::<BigEndian>(self.params.len() as u32)?;
        out.extend_from_slice(&self.params);
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let config_type_raw = cur.read_u32::<BigEndian>().map_err(io_to_core("config_type"))?;
        let config_type = match config_type_raw {
            0 => ConfigType::Delay,
            1 => ConfigType::Loss,
            other => {
                return Err(CoreError::new_local(
                    ErrorKind::ProtocolViolation,
                    format!("unknown config_type {other}"),
                ));
            }
        };
        let model_type_hash = cur.read_u32::<BigEndian>().map_err(io_to_core("model_type_hash"))?;
        let params_len = cur.read_u32::<BigEndian>().map_err(io_to_core("params_len"))? as usize;
        let mut params = vec![0u8; params_len];
        cur.read_exact(&mut params).map_err(io_to_core("params"))?;
        Ok(ConfigBody { config_type, model_type_hash, params })
    }
}

/// `CONFIG_ACK` body: also doubles as the `DEVICE_REGISTER` acknowledgement
/// (spec §4.4 "Respond with an optional ACK whose body carries the assigned
/// device id and echoes the sequence number").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAckBody {
    pub assigned_device_id: u32,
    pub echoed_sequence_number: u32,
}

impl ConfigAckBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.assigned_device_id)?;
        out.write_u32::<BigEndian>(self.echoed_sequence_number)?;
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(ConfigAckBody {
            assigned_device_id: cur.read_u32::<BigEndian>().map_err(io_to_core("assigned_device_id"))?,
            echoed_sequence_number: cur.read_u32::<BigEndian>().map_err(io_to_core("echoed_sequence_number"))?,
        })
    }
}

/// `DEVICE_REMOVE` body: just the device id, carried in the header's
/// `device_id` field; no body bytes are required beyond the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRemoveBody;

impl DeviceRemoveBody {
    pub fn encode(&self, _out: &mut Vec<u8>) -> io::Result<()> {
        Ok(())
    }

    pub fn decode(_bytes: &[u8]) -> Result<Self> {
        Ok(DeviceRemoveBody)
    }
}

/// `ERROR_NOTIFY` body.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponseBody {
    pub error_kind: u32,
    pub context_sequence: u32,
    pub message: String,
}

impl ErrorResponseBody {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        let message_bytes = self.message.as_bytes();
        out.write_u32::<BigEndian>(self.error_kind)?;
        out.write_u32::<BigEndian>(self.context_sequence)?;
        out.write_u32::<BigEndian>(message_bytes.len() as u32)?;
        out.extend_from_slice(message_bytes);
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let error_kind = cur.read_u32::<BigEndian>().map_err(io_to_core("error_kind"))?;
        let context_sequence = cur.read_u32::<BigEndian>().map_err(io_to_core("context_sequence"))?;
        let message_bytes_len = cur.read_u32::<BigEndian>().map_err(io_to_core("message_bytes_len"))? as usize;
        let mut message_bytes = vec![0u8; message_bytes_len];
        cur.read_exact(&mut message_bytes).map_err(io_to_core("message_bytes"))?;
        let message = String::from_utf8_lossy(&message_bytes).into_owned();
        Ok(ErrorResponseBody { error_kind, context_sequence, message })
    }
}
