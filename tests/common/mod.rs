#![allow(dead_code)]

use std::sync::Once;

use cvt::{CalcViewTransformer, Dialect, TransformationConfig};

static INIT: Once = Once::new();

/// Initialize logging once per test binary.
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn transformer(dialect: Dialect) -> CalcViewTransformer {
    init_test_env();
    CalcViewTransformer::new(TransformationConfig::default(), dialect).unwrap()
}

/// Builder for calculation-scenario documents.
pub struct ScenarioXml {
    id: String,
    data_sources: Vec<String>,
    views: Vec<String>,
    logical_model: Option<String>,
}

impl ScenarioXml {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            data_sources: Vec::new(),
            views: Vec::new(),
            logical_model: None,
        }
    }

    pub fn table(mut self, id: &str, schema: &str, object: &str) -> Self {
        self.data_sources.push(format!(
            r#"    <DataSource id="{id}" type="DATA_BASE_TABLE">
      <columnObject schemaName="{schema}" columnObjectName="{object}"/>
    </DataSource>"#
        ));
        self
    }

    pub fn view(mut self, xml: &str) -> Self {
        self.views.push(xml.to_string());
        self
    }

    /// Logical model over `base` exposing `attributes` by name.
    pub fn logical_model(mut self, base: &str, attributes: &[&str]) -> Self {
        let attributes: Vec<String> = attributes
            .iter()
            .map(|a| {
                format!(
                    r#"      <attribute id="{a}"><keyMapping columnObjectName="{base}" columnName="{a}"/></attribute>"#
                )
            })
            .collect();
        self.logical_model = Some(format!(
            "  <logicalModel id=\"{}\">\n    <attributes>\n{}\n    </attributes>\n  </logicalModel>",
            base,
            attributes.join("\n")
        ));
        self
    }

    pub fn build(&self) -> String {
        let mut xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Calculation:scenario xmlns:Calculation=\"http://www.sap.com/ndb/BiModelCalculation.ecore\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" id=\"{}\">\n",
            self.id
        );
        xml.push_str(&format!("  <dataSources>\n{}\n  </dataSources>\n", self.data_sources.join("\n")));
        xml.push_str(&format!(
            "  <calculationViews>\n{}\n  </calculationViews>\n",
            self.views.join("\n")
        ));
        if let Some(model) = &self.logical_model {
            xml.push_str(model);
            xml.push('\n');
        }
        xml.push_str("</Calculation:scenario>");
        xml
    }
}

pub fn mapping(target: &str, source: &str) -> String {
    format!(r#"<mapping xsi:type="Calculation:AttributeMapping" target="{target}" source="{source}"/>"#)
}

pub fn view_attributes(names: &[&str]) -> String {
    let attributes: Vec<String> = names
        .iter()
        .map(|n| format!(r#"<viewAttribute id="{n}"/>"#))
        .collect();
    format!("<viewAttributes>{}</viewAttributes>", attributes.join(""))
}

/// One `<input>` with pass-through mappings for `columns`.
pub fn input(node: &str, columns: &[(&str, &str)]) -> String {
    let mappings: Vec<String> = columns.iter().map(|(t, s)| mapping(t, s)).collect();
    format!("<input node=\"#{}\">{}</input>", node, mappings.join(""))
}

pub fn projection(id: &str, source: &str, columns: &[&str]) -> String {
    let pairs: Vec<(&str, &str)> = columns.iter().map(|c| (*c, *c)).collect();
    format!(
        r#"    <calculationView xsi:type="Calculation:ProjectionView" id="{}">{}{}</calculationView>"#,
        id,
        view_attributes(columns),
        input(source, &pairs)
    )
}
