use ::image::ImageFormat;
use log::info;
use std::io::Cursor;
use std::time::Instant;

use crate::cache::CacheReclaimer;
use crate::error::MediaError;
use crate::llm::vision::Captioner;

/// Decodes any supported image format and re-encodes it as RGB PNG.
pub fn to_rgb_png(bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
    let decoded = ::image::load_from_memory(bytes).map_err(|e| MediaError::Decode(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    let mut buffer = Vec::new();
    rgb
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| MediaError::Decode(e.to_string()))?;
    Ok(buffer)
}

/// Caption for an uploaded image. The reclaim hook runs whatever the outcome.
pub async fn caption_image(
    captioner: &dyn Captioner,
    reclaimer: &dyn CacheReclaimer,
    bytes: Vec<u8>
) -> Result<String, MediaError> {
    let result = caption(captioner, bytes).await;
    reclaimer.reclaim().await;
    result
}

async fn caption(captioner: &dyn Captioner, bytes: Vec<u8>) -> Result<String, MediaError> {
    let png = tokio::task
        ::spawn_blocking(move || to_rgb_png(&bytes)).await
        .map_err(|e| MediaError::Decode(format!("decoder task failed: {}", e)))??;

    let start = Instant::now();
    let caption = captioner.caption(&png).await.map_err(|e| MediaError::Model(e.to_string()))?;
    info!("Image captioned by {} in {:.2}s", captioner.get_model(), start.elapsed().as_secs_f32());

    if caption.trim().is_empty() {
        return Err(MediaError::Model("captioning model returned no text".to_string()));
    }
    Ok(caption.trim().to_string())
}
