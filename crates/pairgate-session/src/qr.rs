use pairgate_core::{PairgateError, PairgateResult};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;

/// Render `code` as a compact QR made of half-block characters.
///
/// Two modules share one character cell vertically. Colors are inverted so
/// the code scans on a dark terminal background.
pub fn render_terminal(code: &str) -> PairgateResult<String> {
    let qr = QrCode::new(code.as_bytes())
        .map_err(|e| PairgateError::InvalidArgument(format!("cannot encode pairing code as QR: {e}")))?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
