use crate::cv::RecognitionResult;
use anyhow::Result;
use opencv::core::{CV_8UC3, Mat, Point, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

const PLACEHOLDER_ROWS: i32 = 480;
const PLACEHOLDER_COLS: i32 = 640;

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

fn white() -> Scalar {
    Scalar::new(255.0, 255.0, 255.0, 0.0)
}

/// Synthesizes a black frame carrying an explanatory caption, used whenever
/// there is no live frame to show.
pub fn placeholder(caption: &str) -> Result<Mat> {
    let mut frame = Mat::new_rows_cols_with_default(
        PLACEHOLDER_ROWS,
        PLACEHOLDER_COLS,
        CV_8UC3,
        Scalar::all(0.0),
    )?;

    imgproc::put_text(
        &mut frame,
        caption,
        Point::new(150, 240),
        FONT,
        1.0,
        white(),
        2,
        imgproc::LINE_8,
        false,
    )?;

    Ok(frame)
}

/// Overlays recognition boxes, labels, confidence readouts and the FPS
/// estimate onto a copy of the latest frame. Never mutates the input.
pub fn compose(frame: &Mat, results: &[RecognitionResult], fps: f32) -> Result<Mat> {
    let mut canvas = frame.clone();

    for result in results {
        draw_face(&mut canvas, result)?;
    }
    draw_fps(&mut canvas, fps)?;

    Ok(canvas)
}

fn draw_face(canvas: &mut Mat, result: &RecognitionResult) -> Result<()> {
    let (color, bg_color) = if result.is_unknown() {
        (Scalar::new(0.0, 0.0, 255.0, 0.0), Scalar::new(0.0, 0.0, 200.0, 0.0))
    } else {
        (Scalar::new(0.0, 255.0, 0.0, 0.0), Scalar::new(0.0, 200.0, 0.0, 0.0))
    };

    imgproc::rectangle(canvas, result.bbox.to_rect(), color, 3, imgproc::LINE_8, 0)?;

    let top = result.bbox.top;
    let bottom = result.bbox.bottom;
    let left = result.bbox.left;

    let mut baseline = 0;
    let label_size = imgproc::get_text_size(&result.label, FONT, 0.8, 2, &mut baseline)?;

    // Label sits above the box unless that would leave the frame.
    let label_y = if top - 15 > label_size.height {
        top - 15
    } else {
        bottom + label_size.height + 15
    };

    imgproc::rectangle(
        canvas,
        Rect::new(
            left,
            label_y - label_size.height - 15,
            label_size.width + 20,
            label_size.height + 20,
        ),
        bg_color,
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )?;

    imgproc::put_text(
        canvas,
        &result.label,
        Point::new(left + 10, label_y - 8),
        FONT,
        0.8,
        white(),
        2,
        imgproc::LINE_8,
        false,
    )?;

    if !result.is_unknown() && result.confidence > 0.0 {
        let conf_text = format!("Conf: {:.1}%", result.confidence * 100.0);
        let conf_size = imgproc::get_text_size(&conf_text, FONT, 0.5, 1, &mut baseline)?;

        imgproc::rectangle(
            canvas,
            Rect::new(
                left,
                label_y + 10,
                conf_size.width + 10,
                conf_size.height + 10,
            ),
            bg_color,
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            canvas,
            &conf_text,
            Point::new(left + 5, label_y + conf_size.height + 15),
            FONT,
            0.5,
            white(),
            1,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(())
}

/// Two-pass text render (light fill over a heavier pass) keeps the readout
/// legible on any background.
fn draw_fps(canvas: &mut Mat, fps: f32) -> Result<()> {
    let text = format!("FPS: {fps:.1}");
    let corner = Point::new(canvas.cols() - 120, 30);

    imgproc::put_text(
        canvas,
        &text,
        corner,
        FONT,
        0.7,
        white(),
        2,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        canvas,
        &text,
        corner,
        FONT,
        0.7,
        Scalar::all(0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;

    Ok(())
}
