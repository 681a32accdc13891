use qrcode::render::svg;
use qrcode::QrCode;

use crate::models::{GenerationMethod, Voucher};

#[derive(thiserror::Error, Debug)]
pub enum QrRenderError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("Voucher is delivered by SMS and has no QR code")]
    NotQrVoucher,
}

/// Renders the voucher's code as a scannable SVG
pub fn render_voucher_svg(voucher: &Voucher) -> Result<String, QrRenderError> {
    if voucher.code_generation_method != GenerationMethod::QrCode {
        return Err(QrRenderError::NotQrVoucher);
    }

    let code = QrCode::new(voucher.voucher_code.as_bytes())?;
    let svg = code.render::<svg::Color>().min_dimensions(200, 200).build();

    Ok(svg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::voucher::tests::sample_voucher;
    use crate::models::VoucherType;

    #[test]
    fn test_renders_svg_for_qr_voucher() {
        let voucher = sample_voucher(VoucherType::OneTime, 1);

        let svg = render_voucher_svg(&voucher).unwrap();

        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_sms_voucher_has_no_qr() {
        let mut voucher = sample_voucher(VoucherType::OneTime, 1);
        voucher.code_generation_method = GenerationMethod::Sms;

        assert!(matches!(
            render_voucher_svg(&voucher),
            Err(QrRenderError::NotQrVoucher)
        ));
    }
}
