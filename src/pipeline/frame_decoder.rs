/// 帧解码器: YUV420P / JPEG → RGB24
/// Converts raw planar frames and key-frame stills into scaled RGB24 output.
use super::{DecodeStatus, DecoderFactory, Sample, SampleFormat, VideoDecoder};
use anyhow::{anyhow, bail, Context, Result};
use fast_image_resize as fr;
use image::ImageFormat;

/// 按样本格式创建 [`FrameDecoder`]; 压缩数据不在此解码
pub struct FrameDecoderFactory;

impl DecoderFactory for FrameDecoderFactory {
    fn create(&self, format: &SampleFormat) -> Result<Box<dyn VideoDecoder>> {
        match format {
            SampleFormat::I420 { .. } | SampleFormat::Jpeg => Ok(Box::new(FrameDecoder::new())),
            SampleFormat::Encoded { codec } => bail!("Unsupported video codec: {}", codec),
            SampleFormat::Audio => bail!("not a video format"),
        }
    }
}

struct RgbFrame {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

pub struct FrameDecoder {
    pending: Option<Sample>,
    output: Option<RgbFrame>,
    resizer: fr::Resizer,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            pending: None,
            output: None,
            resizer: fr::Resizer::new(),
        }
    }
}

impl VideoDecoder for FrameDecoder {
    fn attach(&mut self, sample: &Sample) -> Result<()> {
        if sample.data.is_empty() {
            bail!("empty sample");
        }
        self.pending = Some(sample.clone());
        Ok(())
    }

    fn decode(&mut self) -> Result<DecodeStatus> {
        let Some(sample) = self.pending.take() else {
            return Ok(DecodeStatus::NeedMore);
        };
        let frame = match sample.format {
            SampleFormat::I420 { width, height } => {
                let data = i420_to_rgb24(&sample.data, width as usize, height as usize)?;
                RgbFrame {
                    width,
                    height,
                    data,
                }
            }
            SampleFormat::Jpeg => {
                let img = image::load_from_memory_with_format(&sample.data, ImageFormat::Jpeg)
                    .context("JPEG解码失败")?
                    .to_rgb8();
                let width = u16::try_from(img.width()).context("图片宽度过大")?;
                let height = u16::try_from(img.height()).context("图片高度过大")?;
                RgbFrame {
                    width,
                    height,
                    data: img.into_raw(),
                }
            }
            ref other => bail!("cannot decode {:?}", other),
        };
        self.output = Some(frame);
        Ok(DecodeStatus::HasOutput)
    }

    fn input_size(&self) -> Option<(u16, u16)> {
        self.output.as_ref().map(|f| (f.width, f.height))
    }

    fn rgb24(&mut self, width: u16, height: u16) -> Result<Vec<u8>> {
        let frame = self.output.as_ref().ok_or_else(|| anyhow!("no decoded frame"))?;
        if width == 0 || height == 0 {
            bail!("invalid output size {}x{}", width, height);
        }
        if frame.width == width && frame.height == height {
            return Ok(frame.data.clone());
        }

        // 缩放 (fast_image_resize, 双线性)
        let src = fr::images::Image::from_vec_u8(
            frame.width as u32,
            frame.height as u32,
            frame.data.clone(),
            fr::PixelType::U8x3,
        )
        .context("源图像尺寸不匹配")?;
        let mut dst = fr::images::Image::new(width as u32, height as u32, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .context("缩放失败")?;
        Ok(dst.buffer().to_vec())
    }
}

/// 紧凑 YUV420P 的字节数 (奇数尺寸向上取整色度平面)
pub fn i420_len(width: usize, height: usize) -> usize {
    let chroma = width.div_ceil(2) * height.div_ceil(2);
    width * height + 2 * chroma
}

/// YUV420P → RGB24, BT.601 整数系数 (×128)
pub fn i420_to_rgb24(data: &[u8], width: usize, height: usize) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        bail!("invalid frame size {}x{}", width, height);
    }
    let expected = i420_len(width, height);
    if data.len() < expected {
        bail!("I420 buffer too small: {} < {}", data.len(), expected);
    }
    let uv_stride = width.div_ceil(2);
    let (y_plane, rest) = data.split_at(width * height);
    let (u_plane, v_plane) = rest.split_at(uv_stride * height.div_ceil(2));

    let mut out = vec![0u8; width * height * 3];
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * width;
        let uv_row = (y >> 1) * uv_stride;
        for x in 0..width {
            let y_val = y_plane[y_row + x] as i32;
            let u_val = u_plane[uv_row + (x >> 1)] as i32 - 128;
            let v_val = v_plane[uv_row + (x >> 1)] as i32 - 128;

            out[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            out[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            out[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
    Ok(out)
}
