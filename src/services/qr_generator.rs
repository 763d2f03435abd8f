use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma};
use qrcode::QrCode;
use ring::hmac;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ticket::{NewTicket, Ticket};

const MODULE_SIZE: u32 = 8;
const QUIET_ZONE: u32 = 4;

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("JSON serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Stored QR payload is not a PNG data URL")]
    MalformedDataUrl,
}

/// What a gate scanner reads from a ticket's QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQrPayload {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub owner_id: Uuid,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// HMAC-SHA256 (hex) of the payload without this field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl TicketQrPayload {
    pub fn new(ticket_id: Uuid, event_id: Uuid, owner_id: Uuid, generated_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id,
            event_id,
            owner_id,
            timestamp: generated_at.timestamp_millis(),
            signature: None,
        }
    }

    fn unsigned(&self) -> Self {
        Self {
            signature: None,
            ..self.clone()
        }
    }

    /// Signs the payload in place
    pub fn sign(&mut self, signing_key: &[u8]) -> Result<(), QrGenerationError> {
        let message = serde_json::to_string(&self.unsigned())?;
        let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key);
        let tag = hmac::sign(&key, message.as_bytes());
        self.signature = Some(hex::encode(tag.as_ref()));
        Ok(())
    }

    /// True when the signature matches the payload under `signing_key`
    #[cfg(test)]
    pub(crate) fn verify_signature(&self, signing_key: &[u8]) -> bool {
        let Some(signature) = self.signature.as_deref() else {
            return false;
        };
        let Ok(tag) = hex::decode(signature) else {
            return false;
        };
        let Ok(message) = serde_json::to_string(&self.unsigned()) else {
            return false;
        };

        let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key);
        hmac::verify(&key, message.as_bytes(), &tag).is_ok()
    }
}

/// Anything that carries a ticket identity and a QR payload slot
pub trait QrSubject {
    fn qr_identity(&self) -> (Uuid, Uuid, Uuid);
    fn qr_payload_slot(&mut self) -> &mut Option<String>;
}

impl QrSubject for Ticket {
    fn qr_identity(&self) -> (Uuid, Uuid, Uuid) {
        (self.id, self.event_id, self.owner_id)
    }

    fn qr_payload_slot(&mut self) -> &mut Option<String> {
        &mut self.qr_payload
    }
}

impl QrSubject for NewTicket {
    fn qr_identity(&self) -> (Uuid, Uuid, Uuid) {
        (self.id, self.event_id, self.owner_id)
    }

    fn qr_payload_slot(&mut self) -> &mut Option<String> {
        &mut self.qr_payload
    }
}

/// Generates the QR payload only if none is set yet.
///
/// Returns `true` when a payload was generated.
pub fn ensure_qr_payload<T: QrSubject>(
    subject: &mut T,
    signing_key: &[u8],
) -> Result<bool, QrGenerationError> {
    if subject.qr_payload_slot().is_some() {
        return Ok(false);
    }

    let (ticket_id, event_id, owner_id) = subject.qr_identity();
    let mut payload = TicketQrPayload::new(ticket_id, event_id, owner_id, Utc::now());
    payload.sign(signing_key)?;

    *subject.qr_payload_slot() = Some(generate_qr_data_url(&payload)?);

    tracing::debug!(ticket_id = %ticket_id, "Generated ticket QR payload");

    Ok(true)
}

/// Encodes a signed payload as a `data:image/png;base64,...` URL
pub fn generate_qr_data_url(payload: &TicketQrPayload) -> Result<String, QrGenerationError> {
    let png = generate_qr_png(payload)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Recovers the PNG bytes from a stored data URL
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, QrGenerationError> {
    data_url
        .strip_prefix("data:image/png;base64,")
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .ok_or(QrGenerationError::MalformedDataUrl)
}

/// Renders the payload's QR code as a PNG with a quiet zone
pub fn generate_qr_png(payload: &TicketQrPayload) -> Result<Vec<u8>, QrGenerationError> {
    let json_str = serde_json::to_string(payload)?;
    let code = QrCode::new(json_str.as_bytes())?;

    let width = code.width() as u32;
    let img_size = (width + 2 * QUIET_ZONE) * MODULE_SIZE;

    let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(img_size, img_size, |x, y| {
        let module_x = (x / MODULE_SIZE).checked_sub(QUIET_ZONE);
        let module_y = (y / MODULE_SIZE).checked_sub(QUIET_ZONE);
        match (module_x, module_y) {
            (Some(mx), Some(my)) if mx < width && my < width => {
                match code[(mx as usize, my as usize)] {
                    qrcode::types::Color::Dark => Luma([0u8]),
                    qrcode::types::Color::Light => Luma([255u8]),
                }
            }
            _ => Luma([255u8]),
        }
    });

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}
