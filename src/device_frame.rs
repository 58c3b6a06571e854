use anyhow::Result;
use image::{Rgba, RgbaImage};

use crate::catalog::{bezel_color, DeviceGeometry};
use crate::color::Color;
use crate::raster;
use crate::schema::{DeviceStyle, ShadowSpec};

/// Extra radius of the bezel over the screen corner radius.
const BEZEL_RADIUS_EXTRA: u32 = 10;
/// Clay frames are the bezel color lifted by this much per channel.
const CLAY_LIGHTEN: u8 = 30;
/// The shadow sits this much lower than it does to the side.
const SHADOW_DROP: u32 = 10;

/// Places `screen` inside the device silhouette described by `geometry`.
///
/// The result is `frame_width x frame_height`, or padded by the shadow blur
/// on every side when a shadow is drawn.
pub fn create_device_frame(
    screen: &RgbaImage,
    geometry: &DeviceGeometry,
    color_id: &str,
    style: DeviceStyle,
    shadow: &ShadowSpec,
) -> Result<RgbaImage> {
    let mut screen = raster::resize_exact(screen, geometry.screen_width, geometry.screen_height);
    let mask = raster::rounded_rect_layer(
        geometry.screen_width,
        geometry.screen_height,
        geometry.corner_radius as f32,
        Color::WHITE,
    )?;
    raster::apply_alpha_mask(&mut screen, &mask);

    let mut frame = if style.draws_bezel() {
        let mut color = bezel_color(color_id);
        if style == DeviceStyle::Clay {
            color = color.lightened(CLAY_LIGHTEN);
        }
        raster::rounded_rect_layer(
            geometry.frame_width,
            geometry.frame_height,
            (geometry.corner_radius + BEZEL_RADIUS_EXTRA) as f32,
            color,
        )?
    } else {
        RgbaImage::new(geometry.frame_width, geometry.frame_height)
    };
    raster::overlay_at(
        &mut frame,
        &screen,
        i64::from(geometry.screen_offset_x),
        i64::from(geometry.screen_offset_y),
    );

    if shadow.enabled && style != DeviceStyle::None {
        return Ok(add_shadow(&frame, shadow.blur, shadow.opacity));
    }
    Ok(frame)
}

/// Drop shadow behind `image`. The output is padded by `blur` on every side;
/// the input is left untouched.
pub fn add_shadow(image: &RgbaImage, blur: u32, opacity: f32) -> RgbaImage {
    let opacity = if opacity.is_finite() {
        opacity.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let width = image.width() + blur * 2;
    let height = image.height() + blur * 2;

    let mut shadow = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let alpha = (f32::from(pixel.0[3]) * opacity) as u8;
        if alpha == 0 {
            continue;
        }
        let sx = x + blur;
        let sy = y + blur + SHADOW_DROP;
        if sy < height {
            shadow.put_pixel(sx, sy, Rgba([0, 0, 0, alpha]));
        }
    }
    let mut out = raster::gaussian_blur(&shadow, blur as f32);
    raster::overlay_at(&mut out, image, i64::from(blur), i64::from(blur));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DeviceGeometry {
        DeviceGeometry {
            id: "test-phone".to_owned(),
            name: "Test Phone".to_owned(),
            display_size: String::new(),
            category: "iphone".to_owned(),
            width: 30,
            height: 50,
            frame_width: 40,
            frame_height: 60,
            screen_offset_x: 5,
            screen_offset_y: 5,
            screen_width: 30,
            screen_height: 50,
            corner_radius: 6,
            required: false,
        }
    }

    fn no_shadow() -> ShadowSpec {
        ShadowSpec {
            enabled: false,
            blur: 0,
            opacity: 0.0,
        }
    }

    fn screen() -> RgbaImage {
        raster::solid(60, 100, Color::rgb(0, 200, 0))
    }

    #[test]
    fn realistic_frame_has_bezel_and_screen() {
        let frame = create_device_frame(
            &screen(),
            &geometry(),
            "gold",
            DeviceStyle::Realistic,
            &no_shadow(),
        )
        .unwrap();
        assert_eq!(frame.dimensions(), (40, 60));
        assert_eq!(frame.get_pixel(20, 30).0, [0, 200, 0, 255]);
        assert_eq!(frame.get_pixel(2, 30).0, [245, 231, 208, 255]);
        assert_eq!(frame.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn clay_lightens_and_unknown_color_falls_back() {
        let clay = create_device_frame(
            &screen(),
            &geometry(),
            "not-a-color",
            DeviceStyle::Clay,
            &no_shadow(),
        )
        .unwrap();
        assert_eq!(clay.get_pixel(2, 30).0, [61, 61, 61, 255]);
    }

    #[test]
    fn flat_style_has_no_bezel() {
        let flat = create_device_frame(
            &screen(),
            &geometry(),
            "gold",
            DeviceStyle::Flat,
            &no_shadow(),
        )
        .unwrap();
        assert_eq!(flat.get_pixel(2, 30).0[3], 0);
        assert_eq!(flat.get_pixel(20, 30).0, [0, 200, 0, 255]);
        // rounded screen corner is masked out
        assert_eq!(flat.get_pixel(5, 5).0[3], 0);
    }

    #[test]
    fn shadow_pads_output_and_falls_below() {
        let shadow = ShadowSpec {
            enabled: true,
            blur: 4,
            opacity: 0.5,
        };
        let framed =
            create_device_frame(&screen(), &geometry(), "silver", DeviceStyle::Flat, &shadow)
                .unwrap();
        assert_eq!(framed.dimensions(), (48, 68));
        // just under the screen: only shadow there
        let below = framed.get_pixel(24, 4 + 55 + 3).0;
        assert!(below[3] > 0);
        assert_eq!(&below[..3], &[0, 0, 0]);
        assert_eq!(framed.get_pixel(24, 34).0, [0, 200, 0, 255]);

        let none = create_device_frame(&screen(), &geometry(), "silver", DeviceStyle::None, &shadow)
            .unwrap();
        assert_eq!(none.dimensions(), (40, 60));
    }

    #[test]
    fn add_shadow_leaves_input_untouched() {
        let image = raster::solid(10, 10, Color::WHITE);
        let copy = image.clone();
        let out = add_shadow(&image, 12, 0.3);
        assert_eq!(image, copy);
        assert_eq!(out.dimensions(), (34, 34));
        assert_eq!(out.get_pixel(15, 15).0, [255, 255, 255, 255]);
        assert!(out.get_pixel(17, 31).0[3] > out.get_pixel(17, 2).0[3]);
    }
}
