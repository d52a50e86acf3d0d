//! Wavefront OBJ export of placed instances.

use std::io::Write;

use obj::{Group, IndexTuple, ObjData, Object, SimplePolygon};
use rapier3d_f64::prelude::Isometry;

use crate::types::{Real, Renderable};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write OBJ data: {0}")]
    Obj(String),
    #[error("OBJ output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One placed instance to export.
pub struct ExportInstance<'a> {
    pub name: String,
    pub shape: &'a dyn Renderable,
    pub pose: Isometry<Real>,
}

/// Builds the OBJ document: one object per instance, vertices in world space.
pub fn to_obj_data(instances: &[ExportInstance<'_>]) -> ObjData {
    let mut position = Vec::new();
    let mut objects = Vec::with_capacity(instances.len());

    for instance in instances {
        let offset = position.len();
        position.extend(
            instance
                .shape
                .world_vertices(&instance.pose)
                .iter()
                .map(|v| [v.x as f32, v.y as f32, v.z as f32]),
        );

        let polys = instance
            .shape
            .triangles()
            .iter()
            .map(|tri| {
                SimplePolygon(
                    tri.iter()
                        .map(|&i| IndexTuple(offset + i as usize, None, None))
                        .collect(),
                )
            })
            .collect();

        objects.push(Object {
            name: instance.name.clone(),
            groups: vec![Group {
                polys,
                name: instance.name.clone(),
                index: 0,
                material: None,
            }],
        });
    }

    ObjData {
        position,
        objects,
        ..Default::default()
    }
}

/// Writes the instances as OBJ into `writer`.
pub fn write_obj<W: Write>(
    instances: &[ExportInstance<'_>],
    writer: &mut W,
) -> Result<(), ExportError> {
    to_obj_data(instances)
        .write_to_buf(writer)
        .map_err(|e| ExportError::Obj(e.to_string()))
}

/// Renders the instances as an OBJ document.
pub fn to_obj_string(instances: &[ExportInstance<'_>]) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_obj(instances, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
