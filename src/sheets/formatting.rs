use google_sheets4::FieldMask;
use google_sheets4::api::{
    AddSheetRequest, CellData, CellFormat, Color, GridProperties, GridRange, RepeatCellRequest,
    Request, SheetProperties, TextFormat, UpdateSheetPropertiesRequest,
};

fn header_background() -> Color {
    Color {
        red: Some(0.2),
        green: Some(0.5),
        blue: Some(0.8),
        alpha: Some(1.0),
    }
}

fn header_text() -> Color {
    Color {
        red: Some(1.0),
        green: Some(1.0),
        blue: Some(1.0),
        alpha: Some(1.0),
    }
}

/// Bold white header text on a blue background.
pub(super) fn header_style_rule(sheet_id: i32) -> Request {
    Request {
        repeat_cell: Some(RepeatCellRequest {
            range: Some(GridRange {
                sheet_id: Some(sheet_id),
                start_row_index: Some(0),
                end_row_index: Some(1),
                start_column_index: None,
                end_column_index: None,
            }),
            cell: Some(CellData {
                user_entered_format: Some(CellFormat {
                    background_color: Some(header_background()),
                    text_format: Some(TextFormat {
                        bold: Some(true),
                        foreground_color: Some(header_text()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            fields: Some(FieldMask::new(&[
                "userEnteredFormat.backgroundColor",
                "userEnteredFormat.textFormat",
            ])),
        }),
        ..Default::default()
    }
}

/// Freeze header row.
pub(super) fn freeze_header_rule(sheet_id: i32) -> Request {
    Request {
        update_sheet_properties: Some(UpdateSheetPropertiesRequest {
            properties: Some(SheetProperties {
                sheet_id: Some(sheet_id),
                grid_properties: Some(GridProperties {
                    frozen_row_count: Some(1),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            fields: Some(FieldMask::new(&["gridProperties.frozenRowCount"])),
        }),
        ..Default::default()
    }
}

pub(super) fn add_sheet_rule(sheet_name: &str) -> Request {
    Request {
        add_sheet: Some(AddSheetRequest {
            properties: Some(SheetProperties {
                title: Some(sheet_name.to_string()),
                sheet_type: Some("GRID".to_string()),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}
